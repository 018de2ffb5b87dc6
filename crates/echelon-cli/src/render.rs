use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{cursor, queue, terminal};
use echelon_core::StatusNode;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;

/// Terminal width assumed when the real one cannot be queried.
const FALLBACK_COLUMNS: u16 = 80;

/// How the tree reaches the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Redraw the whole tree in place every `interval` until the root completes.
    Live { interval: Duration, colored: bool },
    /// Print the finished tree once.
    Final { colored: bool },
    /// Print the finished tree as pretty JSON.
    Json,
}

/// Spawn a renderer task for `root`.
///
/// The task ends after the root node completes and its last frame is written.
pub fn spawn_renderer(root: StatusNode, mode: RenderMode) -> JoinHandle<Result<()>> {
    tokio::spawn(async move { render_loop(root, mode).await })
}

async fn render_loop(root: StatusNode, mode: RenderMode) -> Result<()> {
    match mode {
        RenderMode::Live { interval, colored } => {
            let mut screen = LiveScreen::new(io::stdout());
            screen.begin()?;

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let done = root.wait_async();
            tokio::pin!(done);
            let interrupt = tokio::signal::ctrl_c();
            tokio::pin!(interrupt);

            let mut interrupted = false;
            loop {
                tokio::select! {
                    _ = &mut done => break,
                    _ = &mut interrupt => {
                        interrupted = true;
                        break;
                    }
                    _ = ticker.tick() => screen.redraw(&frame(&root, colored), terminal_columns())?,
                }
            }

            screen.redraw(&frame(&root, colored), terminal_columns())?;
            screen.finish()?;
            if interrupted {
                warn!("interrupted while tasks were running");
                anyhow::bail!("Interrupted");
            }
        }
        RenderMode::Final { colored } => {
            root.wait_async().await;
            let mut out = io::stdout().lock();
            for line in frame(&root, colored) {
                writeln!(out, "{}", line)?;
            }
        }
        RenderMode::Json => {
            root.wait_async().await;
            let json = serde_json::to_string_pretty(&root.snapshot())
                .context("Failed to serialize the task tree")?;
            println!("{}", json);
        }
    }
    Ok(())
}

/// Draw `root` with or without color escapes.
fn frame(root: &StatusNode, colored: bool) -> Vec<String> {
    if colored { root.draw() } else { root.draw_plain() }
}

fn terminal_columns() -> u16 {
    terminal::size()
        .map(|(cols, _)| cols)
        .unwrap_or(FALLBACK_COLUMNS)
}

/// Rewrites the previous frame in place.
///
/// The cursor is hidden between `begin` and `finish`. Dropping the screen
/// early, on an error or a panic, shows it again.
struct LiveScreen<W: Write> {
    out: W,
    /// Terminal rows taken by the last frame, wrapped lines included.
    drawn_rows: usize,
    cursor_hidden: bool,
}

impl<W: Write> LiveScreen<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            drawn_rows: 0,
            cursor_hidden: false,
        }
    }

    fn begin(&mut self) -> io::Result<()> {
        queue!(self.out, cursor::Hide)?;
        self.cursor_hidden = true;
        self.out.flush()
    }

    fn redraw(&mut self, lines: &[String], columns: u16) -> io::Result<()> {
        if self.drawn_rows > 0 {
            let up = u16::try_from(self.drawn_rows).unwrap_or(u16::MAX);
            queue!(self.out, cursor::MoveToPreviousLine(up))?;
        }
        queue!(self.out, terminal::Clear(terminal::ClearType::FromCursorDown))?;

        for line in lines {
            writeln!(self.out, "{}", line)?;
        }
        self.out.flush()?;

        self.drawn_rows = lines.iter().map(|l| rows_for(l, columns)).sum();
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        queue!(self.out, cursor::Show)?;
        self.cursor_hidden = false;
        self.out.flush()
    }
}

impl<W: Write> Drop for LiveScreen<W> {
    fn drop(&mut self) {
        if self.cursor_hidden {
            let _ = queue!(self.out, cursor::Show);
            let _ = self.out.flush();
        }
    }
}

/// Printable width of `line`, skipping `ESC[...m` color sequences.
fn visible_width(line: &str) -> usize {
    let mut width = 0;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            // CSI: ESC [ params final-byte
            if chars.next() == Some('[') {
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
        } else {
            width += 1;
        }
    }
    width
}

/// Terminal rows `line` occupies at the given width.
fn rows_for(line: &str, columns: u16) -> usize {
    let columns = usize::from(columns.max(1));
    visible_width(line).div_ceil(columns).max(1)
}
