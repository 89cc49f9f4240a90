//! The generic stage main-loop contract: drain, process, forward, repeat.
//!
//! Every concrete stage (Preproc, Recon, Analysis, Stats, Saver) implements [`Stage`] and is
//! driven by [`run`], which owns the envelope-level bookkeeping (QUIT broadcast, package-boundary
//! forwarding, fatal-error exit) so each stage module only has to say what happens to one `Image`.

use crate::envelope::{Envelope, Message, PackageBoundary};
use crate::queue::{QueueReceiver, QueueSender};
use icemet_model::Image;

/// A pipeline stage: consumes `Image`s from one inbound queue, emits zero or more `Image`s to
/// every queue in [`Stage::outbound`] (in the fixed order the stage was constructed with).
pub trait Stage {
    fn name(&self) -> &'static str;

    fn outbound(&self) -> &[QueueSender];

    /// Processes one Image, returning the Images to forward (commonly zero or one; Preproc's
    /// background-subtraction warm-up is the case that can return zero).
    fn process_image(&mut self, image: Image) -> crate::Result<Vec<Image>>;

    /// Called when a package boundary passes through. Default: no stage-local action (the
    /// boundary itself is still forwarded by the runner regardless of this hook).
    fn on_package(&mut self, _boundary: &PackageBoundary) -> crate::Result<()> {
        Ok(())
    }
}

/// Runs `stage`'s main loop to completion (i.e. until a QUIT marker has been drained and
/// broadcast). Exits the process with code 4 on any stage error, per the "prefer termination over
/// partial corruption" policy.
pub fn run<S: Stage>(mut stage: S, inbound: QueueReceiver) {
    let span = tracing::info_span!("stage", name = stage.name());
    let _enter = span.enter();

    let mut batch = Vec::new();
    loop {
        batch.clear();
        inbound.collect(&mut batch);
        if batch.is_empty() {
            continue;
        }

        let mut quit = false;
        for env in batch.drain(..) {
            match env {
                Envelope::Message(Message::Quit) => {
                    tracing::debug!("quit received, forwarding and terminating");
                    broadcast(&stage, Envelope::Message(Message::Quit));
                    quit = true;
                }
                Envelope::Package(boundary) => {
                    if let Err(err) = stage.on_package(&boundary) {
                        fatal(stage.name(), &err);
                    }
                    broadcast(&stage, Envelope::Package(boundary));
                }
                Envelope::Image(image) => match stage.process_image(*image) {
                    Ok(outputs) => {
                        for output in outputs {
                            broadcast(&stage, Envelope::image(output));
                        }
                    }
                    Err(err) => fatal(stage.name(), &err),
                },
            }
        }

        if quit {
            break;
        }
    }
}

fn broadcast<S: Stage>(stage: &S, env: Envelope) {
    for out in stage.outbound() {
        out.push(env.clone());
    }
}

fn fatal(stage: &str, err: &crate::Error) {
    tracing::error!(stage, error = %err, "fatal error, terminating process");
    std::process::exit(4);
}
