//! UI theme: palette tokens and style helpers for the dashboard host.

use ratatui::style::{Color, Modifier, Style};

use djdash_core::output::Route;

/// Color palette tokens
#[derive(Clone, Debug)]
pub struct Palette {
    pub text: Color,
    /// Secondary info (inactive tabs, hints)
    pub text_dim: Color,
    pub text_muted: Color,
    /// Focus, active tab, command route
    pub accent: Color,
    /// Running server, successful actions
    pub success: Color,
    /// Logs route
    pub warn: Color,
    pub error: Color,
    pub border: Color,
    pub selection_bg: Color,
    pub selection_fg: Color,
    pub key_hint: Color,
}

impl Default for Palette {
    fn default() -> Self {
        Self::dark()
    }
}

impl Palette {
    pub fn dark() -> Self {
        Self {
            text: Color::Rgb(212, 212, 212),
            text_dim: Color::Rgb(150, 150, 150),
            text_muted: Color::Rgb(100, 100, 100),
            accent: Color::Rgb(79, 193, 255),
            success: Color::Rgb(78, 201, 176),
            warn: Color::Rgb(220, 180, 100),
            error: Color::Rgb(244, 135, 113),
            border: Color::Rgb(60, 60, 60),
            selection_bg: Color::Rgb(38, 79, 120),
            selection_fg: Color::White,
            key_hint: Color::Rgb(206, 145, 120),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Theme {
    pub palette: Palette,
}

impl Theme {
    pub fn route_icon(&self, route: Route) -> &'static str {
        match route {
            Route::Command => "$",
            Route::Logs => "≡",
        }
    }

    pub fn route_style(&self, route: Route) -> Style {
        let color = match route {
            Route::Command => self.palette.accent,
            Route::Logs => self.palette.warn,
        };
        Style::default().fg(color)
    }

    pub fn tab_style(&self, active: bool) -> Style {
        if active {
            Style::default().fg(self.palette.accent).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(self.palette.text_dim)
        }
    }

    /// Badge text and style for the tracked server.
    pub fn server_badge(&self, running: bool) -> (&'static str, Style) {
        if running {
            ("● server", Style::default().fg(self.palette.success))
        } else {
            ("○ server", Style::default().fg(self.palette.text_muted))
        }
    }

    pub fn selection_style(&self) -> Style {
        Style::default()
            .bg(self.palette.selection_bg)
            .fg(self.palette.selection_fg)
            .add_modifier(Modifier::BOLD)
    }

    pub fn border_style(&self, focused: bool) -> Style {
        let color = if focused { self.palette.accent } else { self.palette.border };
        Style::default().fg(color)
    }

    pub fn key_hint_style(&self) -> Style {
        Style::default().fg(self.palette.key_hint)
    }

    pub fn text_style(&self) -> Style {
        Style::default().fg(self.palette.text)
    }

    pub fn text_dim_style(&self) -> Style {
        Style::default().fg(self.palette.text_dim)
    }

    /// Status line: errors in red, everything else dimmed.
    pub fn status_style(&self, is_error: bool) -> Style {
        if is_error {
            Style::default().fg(self.palette.error)
        } else {
            self.text_dim_style()
        }
    }
}

static DEFAULT_THEME: std::sync::OnceLock<Theme> = std::sync::OnceLock::new();

pub fn theme() -> &'static Theme {
    DEFAULT_THEME.get_or_init(Theme::default)
}

pub mod styles {
    use super::*;

    pub fn route(route: Route) -> Style {
        theme().route_style(route)
    }

    pub fn route_icon(route: Route) -> &'static str {
        theme().route_icon(route)
    }

    pub fn tab(active: bool) -> Style {
        theme().tab_style(active)
    }

    pub fn server_badge(running: bool) -> (&'static str, Style) {
        theme().server_badge(running)
    }

    pub fn selection() -> Style {
        theme().selection_style()
    }

    pub fn border(focused: bool) -> Style {
        theme().border_style(focused)
    }

    pub fn key_hint() -> Style {
        theme().key_hint_style()
    }

    pub fn text() -> Style {
        theme().text_style()
    }

    pub fn text_dim() -> Style {
        theme().text_dim_style()
    }

    pub fn status(is_error: bool) -> Style {
        theme().status_style(is_error)
    }
}
