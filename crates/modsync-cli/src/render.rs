use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{HumanCount, ProgressBar, ProgressStyle};
use modsync_installer::ActionOutcome;
use modsync_resolver::{ResolutionAction, SkipReason};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style() -> OutputStyle {
    if std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none() {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

pub(crate) struct TerminalProgress {
    style: OutputStyle,
    label: String,
    total: u64,
    current: u64,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn current() -> Self {
        Self::from_style(current_output_style())
    }

    pub(crate) fn style(self) -> OutputStyle {
        self.style
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    pub(crate) fn print_section(self, title: &str) {
        if self.style == OutputStyle::Plain {
            return;
        }
        println!();
        println!("{}", colorize(section_style(), &format!("== {title} ==")));
    }

    pub(crate) fn start_progress(self, label: &str, total: u64) -> TerminalProgress {
        let progress_bar = if self.style == OutputStyle::Rich {
            let progress_bar = ProgressBar::new(total.max(1));
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.cyan.bold} {msg:<12} [{bar:20.cyan/blue}] {pos:>3}/{len:3} {elapsed_precise}",
            ) {
                progress_bar.set_style(style.tick_chars("|/-\\ ").progress_chars("=>-"));
            }
            progress_bar.set_message(label.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };

        TerminalProgress {
            style: self.style,
            label: label.to_string(),
            total,
            current: 0,
            progress_bar,
            started_at: Instant::now(),
        }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }
}

impl TerminalProgress {
    pub(crate) fn inc(&mut self) {
        self.current = (self.current + 1).min(self.total);
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.set_position(self.current.min(self.total.max(1)));
        }
    }

    /// Prints a line without tearing the bar.
    pub(crate) fn println(&self, line: &str) {
        match &self.progress_bar {
            Some(progress_bar) => progress_bar.println(line),
            None => println!("{line}"),
        }
    }

    pub(crate) fn finish_success(mut self) {
        let Some(progress_bar) = self.progress_bar.take() else {
            return;
        };

        progress_bar.finish_and_clear();
        if let Some(line) = render_progress_line(
            self.style,
            &self.label,
            self.current,
            self.total,
            Some(self.started_at.elapsed()),
        ) {
            println!("{line}");
        }
    }

    pub(crate) fn finish_abandon(mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "warn" => "[WARN]",
        "error" => "[ERR]",
        "step" => "[>>]",
        _ => "[..]",
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn progress_bar_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::BrightBlue.into()))
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

fn render_progress_line(
    style: OutputStyle,
    label: &str,
    current: u64,
    total: u64,
    elapsed: Option<Duration>,
) -> Option<String> {
    if style == OutputStyle::Plain {
        return None;
    }

    let width = 18_usize;
    let safe_total = total.max(1);
    let bounded_current = current.min(safe_total);
    let filled = ((bounded_current as usize) * width) / (safe_total as usize);
    let bar = format!(
        "{}{}",
        "=".repeat(filled),
        "-".repeat(width.saturating_sub(filled))
    );
    let percent = (bounded_current * 100) / safe_total;
    let counts = format!("{}/{}", HumanCount(current), HumanCount(total));
    let suffix = elapsed
        .map(|value| format!(" complete in {}", format_elapsed(value)))
        .unwrap_or_default();

    Some(format!(
        "{} [{}] {:>3}% {}{}",
        colorize(progress_label_style(), label),
        colorize(progress_bar_style(), &bar),
        percent,
        counts,
        suffix
    ))
}

fn version_or_dash(version: Option<&str>) -> &str {
    version.unwrap_or("-")
}

/// One line per planned action, as shown by `--dry-run`.
pub(crate) fn format_plan_lines(actions: &[ResolutionAction], style: OutputStyle) -> Vec<String> {
    actions
        .iter()
        .map(|action| {
            let (status, message) = match action {
                ResolutionAction::Install { name, format } => {
                    ("step", format!("install {name} ({})", format.as_str()))
                }
                ResolutionAction::Update {
                    name,
                    format,
                    from,
                    to,
                    major,
                    reason,
                } => {
                    let major = if *major { ", major" } else { "" };
                    (
                        "step",
                        format!(
                            "update {name} {} -> {} ({}, {}{major})",
                            version_or_dash(from.as_deref()),
                            version_or_dash(to.as_deref()),
                            format.as_str(),
                            reason.as_str()
                        ),
                    )
                }
                ResolutionAction::Uninstall { name } => ("step", format!("uninstall {name}")),
                ResolutionAction::Skip { name, reason } => {
                    let status = match reason {
                        SkipReason::UnknownOrigin | SkipReason::ConfirmationRequired => "warn",
                        _ => "info",
                    };
                    (status, format!("skip {name} ({})", reason.as_str()))
                }
            };
            render_status_line(style, status, &message)
        })
        .collect()
}

/// Table rows for `list`: pending updates and modules needing review.
pub(crate) fn format_outdated_table(
    actions: &[ResolutionAction],
    catalog_version: impl Fn(&str) -> Option<String>,
    device_version: impl Fn(&str) -> Option<String>,
) -> Vec<String> {
    let rows = actions
        .iter()
        .filter_map(|action| match action {
            ResolutionAction::Update {
                name,
                from,
                to,
                major,
                reason,
                ..
            } => {
                let reason = if *major {
                    "major".to_string()
                } else {
                    reason.as_str().to_string()
                };
                Some([
                    name.clone(),
                    version_or_dash(from.as_deref()).to_string(),
                    version_or_dash(to.as_deref()).to_string(),
                    reason,
                ])
            }
            ResolutionAction::Skip {
                name,
                reason: reason @ (SkipReason::NeedsReview | SkipReason::ConfirmationRequired),
            } => Some([
                name.clone(),
                version_or_dash(device_version(name).as_deref()).to_string(),
                version_or_dash(catalog_version(name).as_deref()).to_string(),
                reason.as_str().to_string(),
            ]),
            _ => None,
        })
        .collect::<Vec<_>>();

    if rows.is_empty() {
        return vec!["All modules are up to date.".to_string()];
    }

    let header = [
        "Module".to_string(),
        "Version".to_string(),
        "Latest".to_string(),
        "Reason".to_string(),
    ];
    let mut widths = header.iter().map(String::len).collect::<Vec<_>>();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let render_row = |row: &[String; 4]| {
        row.iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![render_row(&header)];
    lines.push(
        widths
            .iter()
            .map(|width| "-".repeat(*width))
            .collect::<Vec<_>>()
            .join("  "),
    );
    lines.extend(rows.iter().map(render_row));
    lines
}

pub(crate) fn format_outcome_line(outcome: &ActionOutcome, style: OutputStyle) -> String {
    let message = match outcome {
        ActionOutcome::Installed { name, path } => {
            format!("installed {name} at {}", path.display())
        }
        ActionOutcome::Updated { name, from, to, .. } => format!(
            "updated {name} {} -> {}",
            version_or_dash(from.as_deref()),
            version_or_dash(to.as_deref())
        ),
        ActionOutcome::Removed { name, .. } => format!("removed {name}"),
        ActionOutcome::Skipped { name, reason } => format!("skipped {name} ({})", reason.as_str()),
    };
    let status = match outcome {
        ActionOutcome::Skipped { .. } => "info",
        _ => "ok",
    };
    render_status_line(style, status, &message)
}
