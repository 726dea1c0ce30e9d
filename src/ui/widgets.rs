//! Custom TUI widgets

use super::ThemeColors;
use crate::aggregate::AggregationReport;
use crate::model::{Mode, SampleSummary, TimingMap};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

/// List of stored samples
pub struct SamplesPanel<'a> {
    samples: &'a [SampleSummary],
    selected: usize,
    colors: ThemeColors,
}

impl<'a> SamplesPanel<'a> {
    pub fn new(samples: &'a [SampleSummary], selected: usize, colors: ThemeColors) -> Self {
        Self {
            samples,
            selected,
            colors,
        }
    }
}

impl<'a> Widget for SamplesPanel<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let c = self.colors;
        let block = Block::default()
            .title(format!(" Samples ({}) ", self.samples.len()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(c.dim));

        let inner = block.inner(area);
        block.render(area, buf);

        if self.samples.is_empty() {
            buf.set_string(
                inner.x + 1,
                inner.y,
                "No samples yet. Press r to record a take.",
                Style::default().fg(c.dim),
            );
            return;
        }

        let header = format!(" {:>4}  {:<19}  {:>6}  {:>9}", "ID", "Recorded", "Events", "Length");
        buf.set_string(
            inner.x,
            inner.y,
            &header,
            Style::default().fg(c.accent).add_modifier(Modifier::BOLD),
        );

        // Keep the selection visible
        let rows = inner.height.saturating_sub(1) as usize;
        let first = self.selected.saturating_sub(rows.saturating_sub(1));

        for (row, (i, sample)) in self.samples.iter().enumerate().skip(first).take(rows).enumerate() {
            let recorded = chrono::DateTime::from_timestamp_millis(sample.started_at)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".into());
            let text = format!(
                " {:>4}  {:<19}  {:>6}  {:>6.2} s",
                sample.id,
                recorded,
                sample.event_count,
                sample.duration_ms as f64 / 1000.0
            );
            let style = if i == self.selected {
                Style::default().fg(c.select_fg).bg(c.select_bg)
            } else if sample.event_count == 0 {
                Style::default().fg(c.yellow)
            } else {
                Style::default().fg(c.fg)
            };
            buf.set_string(inner.x, inner.y + 1 + row as u16, &text, style);
        }
    }
}

/// Aggregated timing map with per-entry statistics
pub struct TimingMapPanel<'a> {
    map: &'a TimingMap,
    report: &'a AggregationReport,
    colors: ThemeColors,
}

impl<'a> TimingMapPanel<'a> {
    pub fn new(map: &'a TimingMap, report: &'a AggregationReport, colors: ThemeColors) -> Self {
        Self { map, report, colors }
    }

    fn fmt_ms(v: Option<f64>) -> String {
        v.map(|v| format!("{:.1}", v)).unwrap_or_else(|| "--".into())
    }
}

impl<'a> Widget for TimingMapPanel<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let c = self.colors;
        let block = Block::default()
            .title(format!(
                " Timing Map ({} entries, {} playable) ",
                self.map.len(),
                self.map.playable().count()
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(c.dim));

        let inner = block.inner(area);
        block.render(area, buf);

        let summary = Line::from(vec![
            Span::styled(" samples ", Style::default().fg(c.dim)),
            Span::styled(self.report.sample_count.to_string(), Style::default().fg(c.fg)),
            Span::styled("  rejected ", Style::default().fg(c.dim)),
            Span::styled(self.report.rejected_count.to_string(), Style::default().fg(c.yellow)),
            Span::styled("  imputed ", Style::default().fg(c.dim)),
            Span::styled(self.report.imputed_count.to_string(), Style::default().fg(c.accent)),
            Span::styled("  extras ", Style::default().fg(c.dim)),
            Span::styled(self.report.extra_count.to_string(), Style::default().fg(c.yellow)),
        ]);
        buf.set_line(inner.x, inner.y, &summary, inner.width);

        if self.map.is_empty() {
            let msg = if self.report.insufficient_samples {
                "No samples aggregated. Record takes, then press b."
            } else {
                "Timing map is empty."
            };
            buf.set_string(inner.x + 1, inner.y + 2, msg, Style::default().fg(c.dim));
            return;
        }

        let header = format!(
            " {:<6} {:<3} {:>4}  {:>9} {:>9} {:>7}  {:>3} {:>3} {:>3}",
            "Key", "", "#", "avg ms", "median", "std", "n", "rej", "imp"
        );
        buf.set_string(
            inner.x,
            inner.y + 1,
            &header,
            Style::default().fg(c.accent).add_modifier(Modifier::BOLD),
        );

        let rows = inner.height.saturating_sub(2) as usize;
        for (row, entry) in self.map.entries().take(rows).enumerate() {
            let mode = match entry.mode {
                Mode::Press => "dn",
                Mode::Release => "up",
            };
            let text = format!(
                " {:<6} {:<3} {:>4}  {:>9} {:>9} {:>7}  {:>3} {:>3} {:>3}",
                entry.key.label(),
                mode,
                entry.position_index,
                Self::fmt_ms(entry.avg_ms),
                Self::fmt_ms(entry.median_ms),
                Self::fmt_ms(entry.std_ms),
                entry.sample_count,
                entry.rejected_count,
                entry.imputed_count
            );
            let style = if entry.is_insufficient() {
                Style::default().fg(c.red)
            } else {
                Style::default().fg(c.fg)
            };
            buf.set_string(inner.x, inner.y + 2 + row as u16, &text, style);
        }
    }
}

/// Widget for the help screen
pub struct HelpPanel {
    colors: ThemeColors,
}

impl HelpPanel {
    pub fn new(colors: ThemeColors) -> Self {
        Self { colors }
    }
}

impl Widget for HelpPanel {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let c = self.colors;
        let block = Block::default()
            .title(" Help - keyfuse ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(c.accent));

        let inner = block.inner(area);
        block.render(area, buf);

        let help_text = vec![
            "",
            " SESSION",
            " -----------",
            " r / F9           : Start or stop recording a take",
            " b                : Rebuild the timing map from all samples",
            " p / F10          : Play the timing map, or stop playback",
            " Enter            : Play the selected sample on its own",
            " d                : Dry run (play into memory, no key output)",
            " c                : Clear all samples",
            " x                : Delete the selected sample",
            "",
            " FILES",
            " -----------",
            " s                : Save samples",
            " o                : Reload saved samples",
            " l                : Load the exported timing map",
            " e                : Export timing map and session report",
            "",
            " NAVIGATION",
            " -----------",
            " Tab / Shift+Tab  : Switch view",
            " Up / Down        : Select sample",
            " t                : Cycle theme",
            " ?                : Show this help",
            " q / Esc          : Quit (releases any held keys)",
            "",
            " F9 and F10 also work system-wide while another window has focus.",
            " While recording or playing only the stop keys are active.",
        ];

        for (i, line) in help_text.iter().enumerate() {
            if i as u16 >= inner.height {
                break;
            }
            let style = if line.contains("---") {
                Style::default().fg(c.dim)
            } else if line.chars().nth(1).map(|ch| ch.is_uppercase()).unwrap_or(false)
                && line.trim() == line.trim().to_uppercase()
            {
                Style::default().fg(c.yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(c.fg)
            };
            buf.set_string(inner.x, inner.y + i as u16, line, style);
        }
    }
}

/// Status bar widget
pub struct StatusBar<'a> {
    state: &'a str,
    backend: &'a str,
    elapsed: &'a str,
    samples: usize,
    message: Option<&'a str>,
    colors: ThemeColors,
}

impl<'a> StatusBar<'a> {
    pub fn new(state: &'a str, backend: &'a str, elapsed: &'a str, samples: usize, colors: ThemeColors) -> Self {
        Self {
            state,
            backend,
            elapsed,
            samples,
            message: None,
            colors,
        }
    }

    pub fn message(mut self, message: Option<&'a str>) -> Self {
        self.message = message;
        self
    }
}

impl<'a> Widget for StatusBar<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let c = self.colors;
        // Background
        let bg_style = Style::default().bg(c.bar_bg).fg(c.fg);
        for x in area.x..area.x + area.width {
            buf.set_string(x, area.y, " ", bg_style);
        }

        // Left side: state and capture backend
        let state_style = match self.state {
            "RECORDING" => bg_style.fg(c.red),
            "PLAYING" => bg_style.fg(c.green),
            _ => bg_style,
        };
        let left = format!(" {} ", self.state);
        buf.set_string(area.x, area.y, &left, state_style.add_modifier(Modifier::BOLD));
        let backend = format!("| {} ", self.backend);
        buf.set_string(area.x + left.len() as u16, area.y, &backend, bg_style);

        // Center: message if any
        if let Some(msg) = self.message {
            let msg_style = bg_style.fg(c.yellow);
            let msg_x = area.x + (area.width / 2).saturating_sub(msg.len() as u16 / 2);
            buf.set_string(msg_x, area.y, msg, msg_style);
        }

        // Right side: elapsed time and sample count
        let right = format!(" {} | Samples: {} ", self.elapsed, self.samples);
        let right_x = area.x + area.width.saturating_sub(right.len() as u16);
        buf.set_string(right_x, area.y, &right, bg_style);
    }
}

/// Tab bar widget
pub struct TabBar<'a> {
    tabs: &'a [&'a str],
    selected: usize,
    colors: ThemeColors,
}

impl<'a> TabBar<'a> {
    pub fn new(tabs: &'a [&'a str], selected: usize, colors: ThemeColors) -> Self {
        Self { tabs, selected, colors }
    }
}

impl<'a> Widget for TabBar<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let c = self.colors;
        let mut x = area.x;

        for (i, tab) in self.tabs.iter().enumerate() {
            let style = if i == self.selected {
                Style::default()
                    .fg(c.select_fg)
                    .bg(c.accent)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(c.tab_fg).bg(c.bar_bg)
            };

            let label = format!(" {} ", tab);
            let width = label.len() as u16;

            if x + width <= area.x + area.width {
                buf.set_string(x, area.y, &label, style);
                x += width;

                // Separator
                if i < self.tabs.len() - 1 && x < area.x + area.width {
                    buf.set_string(x, area.y, "|", Style::default().fg(c.dim).bg(c.bar_bg));
                    x += 1;
                }
            }
        }

        // Fill rest with background
        for fill_x in x..area.x + area.width {
            buf.set_string(fill_x, area.y, " ", Style::default().bg(c.bar_bg));
        }
    }
}
