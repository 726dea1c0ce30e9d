//! Theme color definitions for the UI
//!
//! Provides dark and light color palettes that can be switched at runtime.

use crate::config::Theme;
use ratatui::style::Color;

/// Complete color palette for the UI
#[derive(Debug, Clone, Copy)]
pub struct ThemeColors {
    pub bg: Color,
    pub fg: Color,
    /// Secondary text and empty cells
    pub dim: Color,
    /// Headings, borders and the active tab
    pub accent: Color,
    pub green: Color,
    pub yellow: Color,
    pub red: Color,
    /// Status and tab bar background
    pub bar_bg: Color,
    pub select_bg: Color,
    /// Inactive tab text
    pub tab_fg: Color,
    /// Selected row and active tab text
    pub select_fg: Color,
}

impl ThemeColors {
    /// Create a color palette for the given theme variant
    pub fn from_theme(theme: Theme) -> Self {
        match theme {
            Theme::Dark => Self::dark(),
            Theme::Light => Self::light(),
        }
    }

    /// Dark theme, slate with an amber accent
    pub fn dark() -> Self {
        Self {
            bg: Color::Rgb(18, 20, 27),
            fg: Color::Rgb(214, 210, 198),
            dim: Color::Rgb(96, 101, 118),
            accent: Color::Rgb(245, 166, 35),
            green: Color::Rgb(112, 206, 150),
            yellow: Color::Rgb(236, 204, 104),
            red: Color::Rgb(232, 96, 120),
            bar_bg: Color::Rgb(33, 36, 48),
            select_bg: Color::Rgb(245, 166, 35),
            tab_fg: Color::Rgb(160, 164, 178),
            select_fg: Color::Rgb(18, 20, 27),
        }
    }

    /// Light theme for bright terminals
    pub fn light() -> Self {
        Self {
            bg: Color::Rgb(250, 247, 240),
            fg: Color::Rgb(36, 38, 48),
            dim: Color::Rgb(138, 134, 124),
            accent: Color::Rgb(176, 96, 0),
            green: Color::Rgb(28, 128, 84),
            yellow: Color::Rgb(160, 118, 10),
            red: Color::Rgb(184, 40, 72),
            bar_bg: Color::Rgb(232, 226, 212),
            select_bg: Color::Rgb(176, 96, 0),
            tab_fg: Color::Rgb(70, 68, 62),
            select_fg: Color::Rgb(250, 247, 240),
        }
    }
}
