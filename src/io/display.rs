//! Status display frames
//!
//! A `DisplayFrame` is the complete content of the 128x64 panel for one
//! cycle. Rendering pixels is the display's concern; the controller only
//! decides what to show.

use crate::domain::occupancy::OccupancySnapshot;
use crate::domain::types::GateState;
use crate::io::hardware::StatusDisplay;
use async_trait::async_trait;
use smallvec::SmallVec;
use tracing::info;

/// Panel width in pixels, used to scale the availability bar
pub const PANEL_WIDTH: u32 = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayFrame {
    pub prompt: &'static str,
    pub available: usize,
    pub total: usize,
    pub free: SmallVec<[bool; 8]>,
    /// Width of the availability bar, proportional to free spots
    pub bar_width: u32,
}

impl DisplayFrame {
    pub fn new(snapshot: &OccupancySnapshot, gate: GateState) -> Self {
        let available = snapshot.available_count();
        let total = snapshot.total();
        let bar_width =
            if total == 0 { 0 } else { (available as u32 * PANEL_WIDTH) / total as u32 };

        Self { prompt: prompt_for(gate), available, total, free: snapshot.free_flags(), bar_width }
    }

    /// Text lines in panel order
    pub fn lines(&self) -> [String; 3] {
        let spots = self
            .free
            .iter()
            .enumerate()
            .map(|(i, free)| format!("S{}: {}", i + 1, if *free { "O" } else { "X" }))
            .collect::<Vec<_>>()
            .join(" ");

        [self.prompt.to_string(), format!("Available: {}", self.available), spots]
    }
}

fn prompt_for(gate: GateState) -> &'static str {
    match gate {
        GateState::Closed => "Insert ID",
        GateState::Open => "Gate open",
        GateState::ClosingPending => "Gate closing",
    }
}

/// Display that writes frames to the log, only when the content changes
#[derive(Default)]
pub struct LogDisplay {
    last: Option<DisplayFrame>,
}

impl LogDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusDisplay for LogDisplay {
    async fn render(&mut self, frame: &DisplayFrame) -> anyhow::Result<()> {
        if self.last.as_ref() == Some(frame) {
            return Ok(());
        }
        let [prompt, available, spots] = frame.lines();
        info!(prompt = %prompt, available = %available, spots = %spots, "display");
        self.last = Some(frame.clone());
        Ok(())
    }
}
