//! Terminal renderer for `teleboard watch`.
//!
//! Table mode redraws the whole frame every tick so ages keep counting;
//! structured formats emit one document per frame whose channel data
//! actually changed.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::Tabled;
use tokio::sync::oneshot;

use teleboard_core::{ChannelId, ChannelMap, RenderFrame, Renderer, SampleValue};

use crate::cli::OutputFormat;
use crate::error::CliError;
use crate::output;

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

// ── Views ───────────────────────────────────────────────────────────

#[derive(Tabled)]
struct FrameRow {
    #[tabled(rename = "Channel")]
    channel: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Age")]
    age: String,
    #[tabled(rename = "Rate")]
    rate: String,
    #[tabled(rename = "Updates")]
    updates: u64,
    #[tabled(rename = "Status")]
    status: String,
}

#[derive(Debug, Serialize)]
pub struct ChannelView<'a> {
    pub channel: &'a ChannelId,
    pub value: &'a SampleValue,
    pub source_ts: DateTime<Utc>,
    pub age_ms: u64,
    pub rate_hz: f64,
    pub updates: u64,
    pub stale: bool,
}

#[derive(Debug, Serialize)]
pub struct FrameView<'a> {
    pub sequence: u64,
    pub generated_at: DateTime<Utc>,
    pub channels: Vec<ChannelView<'a>>,
}

/// Project a frame onto the selected channels (all when `filter` is empty).
pub fn frame_view<'a>(
    frame: &'a RenderFrame,
    filter: &[ChannelId],
    now: DateTime<Utc>,
) -> FrameView<'a> {
    let channels = frame
        .snapshot
        .values()
        .filter(|state| filter.is_empty() || filter.contains(&state.channel_id))
        .map(|state| ChannelView {
            channel: &state.channel_id,
            value: &state.latest_value,
            source_ts: state.source_ts,
            age_ms: u64::try_from(state.age(now).as_millis()).unwrap_or(u64::MAX),
            rate_hz: state.rate_hz,
            updates: state.update_count,
            stale: state.stale,
        })
        .collect();
    FrameView {
        sequence: frame.sequence,
        generated_at: frame.generated_at,
        channels,
    }
}

/// Render one frame as text in `format`.
pub fn render_frame(
    frame: &RenderFrame,
    filter: &[ChannelId],
    format: OutputFormat,
    color: bool,
    now: DateTime<Utc>,
) -> Result<String, CliError> {
    let view = frame_view(frame, filter, now);
    match format {
        OutputFormat::Table => Ok(render_table(&view, color)),
        OutputFormat::Json => output::render_json(&view, false),
        OutputFormat::JsonCompact => output::render_json(&view, true),
        OutputFormat::Yaml => output::render_yaml(&view).map(|doc| format!("---\n{doc}")),
        OutputFormat::Plain => Ok(view
            .channels
            .iter()
            .map(|c| {
                let marker = if c.stale { " (stale)" } else { "" };
                format!("{}={}{marker}", c.channel, c.value)
            })
            .collect::<Vec<_>>()
            .join("\n")),
    }
}

fn render_table(view: &FrameView<'_>, color: bool) -> String {
    let stale = view.channels.iter().filter(|c| c.stale).count();
    let header = format!(
        "frame {} · {} channels · {stale} stale · {}",
        view.sequence,
        view.channels.len(),
        view.generated_at.format("%H:%M:%S%.3f"),
    );

    if view.channels.is_empty() {
        return format!("{header}\nwaiting for data...");
    }

    let rows: Vec<FrameRow> = view
        .channels
        .iter()
        .map(|c| FrameRow {
            channel: c.channel.to_string(),
            value: c.value.to_string(),
            age: humantime::format_duration(Duration::from_secs(c.age_ms / 1000)).to_string(),
            rate: format!("{:.1} Hz", c.rate_hz),
            updates: c.updates,
            status: status_label(c.stale, color),
        })
        .collect();
    format!("{header}\n{}", output::render_table(&rows))
}

fn status_label(stale: bool, color: bool) -> String {
    match (stale, color) {
        (true, true) => "stale".yellow().to_string(),
        (true, false) => "stale".into(),
        (false, true) => "live".green().to_string(),
        (false, false) => "live".into(),
    }
}

// ── Renderer ────────────────────────────────────────────────────────

/// Completion signal for a driven renderer: the frame limit was reached, or
/// writing failed.
pub type RenderDone = oneshot::Receiver<Result<(), CliError>>;

/// Writes frames to a terminal (or any writer).
pub struct TerminalRenderer<W> {
    out: W,
    format: OutputFormat,
    color: bool,
    /// Clear the screen before each table redraw.
    redraw: bool,
    filter: Vec<ChannelId>,
    last_snapshot: Option<Arc<ChannelMap>>,
    rendered: u64,
    limit: Option<u64>,
    done: Option<oneshot::Sender<Result<(), CliError>>>,
    stopped: bool,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W, format: OutputFormat, color: bool, redraw: bool) -> Self {
        Self {
            out,
            format,
            color,
            redraw,
            filter: Vec::new(),
            last_snapshot: None,
            rendered: 0,
            limit: None,
            done: None,
            stopped: false,
        }
    }

    pub fn with_filter(mut self, filter: Vec<ChannelId>) -> Self {
        self.filter = filter;
        self
    }

    /// Stop after `limit` frames, if set. The returned receiver resolves
    /// once the limit is reached or a write fails.
    pub fn until_done(mut self, limit: Option<u64>) -> (Self, RenderDone) {
        let (tx, rx) = oneshot::channel();
        self.limit = limit;
        self.done = Some(tx);
        (self, rx)
    }

    #[cfg(test)]
    pub fn rendered(&self) -> u64 {
        self.rendered
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Render `frame` as of `now`. Returns whether anything was written.
    pub fn render_at(&mut self, frame: &RenderFrame, now: DateTime<Utc>) -> Result<bool, CliError> {
        let unchanged = self
            .last_snapshot
            .as_ref()
            .is_some_and(|last| Arc::ptr_eq(last, &frame.snapshot));
        if unchanged && self.format != OutputFormat::Table {
            return Ok(false);
        }
        self.last_snapshot = Some(Arc::clone(&frame.snapshot));

        let text = render_frame(frame, &self.filter, self.format, self.color, now)?;
        if self.redraw && self.format == OutputFormat::Table {
            write!(self.out, "{CLEAR_SCREEN}")?;
        }
        writeln!(self.out, "{text}")?;
        self.out.flush()?;
        self.rendered += 1;
        Ok(true)
    }

    fn finish(&mut self, outcome: Result<(), CliError>) {
        self.stopped = true;
        if let Some(done) = self.done.take() {
            let _ = done.send(outcome);
        }
    }
}

impl<W: Write + Send + 'static> Renderer for TerminalRenderer<W> {
    fn ingest(&mut self, frame: Arc<RenderFrame>) {
        if self.stopped {
            return;
        }
        match self.render_at(&frame, Utc::now()) {
            Ok(_) => {
                if self.limit.is_some_and(|n| self.rendered >= n) {
                    self.finish(Ok(()));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, sequence = frame.sequence, "failed to render frame");
                self.finish(Err(e));
            }
        }
    }
}
