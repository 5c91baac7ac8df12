//! Presentation boundary: turns pipeline stage events into serializable
//! UI events and forwards them through a channel to the HTTP stream.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::channel::mpsc::UnboundedSender;
use image::DynamicImage;
use log::warn;
use shared::{AnalysisEvent, Stage};

use crate::codec;
use crate::pipeline::{StageEvent, StageObserver};

/// Default panel height. Display-only; model inputs are never resized.
pub const DISPLAY_HEIGHT: u32 = 350;

#[derive(Debug, Clone, Copy)]
pub struct DisplayOptions {
    pub height: u32,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            height: DISPLAY_HEIGHT,
        }
    }
}

/// Spinner text for the blocking stage that follows the rendered panel.
fn busy_hint(stage: Stage) -> Option<&'static str> {
    match stage {
        Stage::Original => Some("Detecting reaction region..."),
        Stage::Crop => Some("Analyzing reaction pattern..."),
        Stage::Heatmap | Stage::Result => None,
    }
}

/// `StageObserver` that renders each event as a wire `AnalysisEvent` and
/// pushes it onto an unbounded channel, preserving emission order.
pub struct ChannelAdapter {
    tx: UnboundedSender<AnalysisEvent>,
    display_height: u32,
}

impl ChannelAdapter {
    pub fn new(tx: UnboundedSender<AnalysisEvent>, options: DisplayOptions) -> Self {
        Self {
            tx,
            display_height: options.height,
        }
    }

    fn panel(&self, stage: Stage, image: &DynamicImage) -> AnalysisEvent {
        let shown = codec::resize_for_display(image, self.display_height);
        match codec::encode_png(&shown) {
            Ok(png) => AnalysisEvent::Panel {
                stage,
                caption: stage.caption().to_string(),
                progress: stage.progress(),
                image_base64: BASE64.encode(png),
                busy: busy_hint(stage).map(str::to_string),
            },
            Err(e) => AnalysisEvent::Error {
                stage,
                message: format!("could not render panel: {e}"),
            },
        }
    }
}

impl StageObserver for ChannelAdapter {
    fn on_event(&mut self, event: StageEvent) {
        let event = match event {
            StageEvent::Started { run_id } => AnalysisEvent::Started { run_id },
            StageEvent::StageCompleted { stage, image } => self.panel(stage, &image),
            StageEvent::ResultReady(result) => AnalysisEvent::Result {
                label: result.label,
                advice: result.advice,
                probability: result.probability,
                progress: Stage::Result.progress(),
            },
            StageEvent::Failed { stage, message } => AnalysisEvent::Error { stage, message },
        };
        if self.tx.unbounded_send(event).is_err() {
            warn!("presentation client disconnected, dropping event");
        }
    }
}
