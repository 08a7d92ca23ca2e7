use ash::prelude::VkResult;
use ash::vk;
use color_eyre::Result;
use crate::renderer::core::check::VkCheck;
use crate::renderer::core::queue::Queue;

/// What `vkAcquireNextImageKHR` told us about the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready. A suboptimal chain still renders this frame and is rebuilt afterwards.
    Acquired { image_index: u32, suboptimal: bool },
    /// Nothing was acquired and the chain has to be rebuilt before the next frame
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn is_stale(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// Result of one pass through the frame protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame reached the display and the slot cursor moved on
    Presented,
    /// The chain went stale during acquire or present. The cursor did not move.
    Skipped,
}

/// What the frame protocol does after presenting an acquired image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDisposition {
    pub mark_stale: bool,
    pub advance: bool,
}

impl FrameDisposition {
    pub fn outcome(self) -> FrameOutcome {
        if self.advance {
            FrameOutcome::Presented
        } else {
            FrameOutcome::Skipped
        }
    }
}

/// A suboptimal acquire still lets the frame count; a stale present never does
pub fn frame_disposition(acquire_suboptimal: bool, presented: PresentOutcome) -> FrameDisposition {
    FrameDisposition {
        mark_stale: acquire_suboptimal || presented.is_stale(),
        advance: !presented.is_stale(),
    }
}

pub fn classify_acquire(result: VkResult<(u32, bool)>) -> Result<AcquireOutcome> {
    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(err) => Err(err).check("vkAcquireNextImageKHR"),
    }
}

pub fn classify_present(result: VkResult<bool>) -> Result<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
        Err(err) => Err(err).check("vkQueuePresentKHR"),
    }
}

/// Device objects and chain properties handed to the drawing layer
pub struct ContentContext<'a> {
    pub device: &'a ash::Device,
    pub graphics_queue: Queue,
    pub present_queue: Queue,
    pub command_pool: vk::CommandPool,
    pub image_count: u32,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub image_views: &'a [vk::ImageView],
}

/// What gets drawn. The core owns the frame protocol and calls into this at fixed points.
pub trait FrameContent {
    /// Runs after every swapchain build, before the first frame that uses the new chain.
    /// The device is idle and nothing sized to the previous chain is in use.
    fn on_swapchain_rebuilt(&mut self, ctx: &ContentContext) -> Result<()>;

    /// Records into `cmd`, which is already in the recording state. The image must end up in
    /// `PRESENT_SRC_KHR`.
    fn record(&mut self, ctx: &ContentContext, cmd: vk::CommandBuffer, image_index: u32) -> Result<()>;

    /// Called once during teardown while the device is idle, before the command pool goes away
    fn destroy(&mut self, device: &ash::Device);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::core::sync::{FrameCursor, MAX_FRAMES_IN_FLIGHT};

    #[test]
    fn acquire_out_of_date_is_not_an_error() {
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );
    }

    #[test]
    fn suboptimal_acquire_still_yields_an_image() {
        assert_eq!(
            classify_acquire(Ok((2, true))).unwrap(),
            AcquireOutcome::Acquired { image_index: 2, suboptimal: true }
        );
    }

    #[test]
    fn other_acquire_failures_are_fatal() {
        let err = classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).unwrap_err();
        assert_eq!(err.to_string(), "vkAcquireNextImageKHR failed");
    }

    #[test]
    fn present_results() {
        assert_eq!(classify_present(Ok(false)).unwrap(), PresentOutcome::Presented);
        assert_eq!(classify_present(Ok(true)).unwrap(), PresentOutcome::Suboptimal);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::OutOfDate
        );
        assert!(classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());

        assert!(!PresentOutcome::Presented.is_stale());
        assert!(PresentOutcome::Suboptimal.is_stale());
        assert!(PresentOutcome::OutOfDate.is_stale());
    }

    /// Runs one frame's disposition against a real cursor
    fn apply(cursor: &mut FrameCursor, suboptimal: bool, presented: PresentOutcome) -> (bool, FrameOutcome) {
        let disposition = frame_disposition(suboptimal, presented);
        if disposition.advance {
            cursor.advance();
        }
        (disposition.mark_stale, disposition.outcome())
    }

    #[test]
    fn cursor_moves_only_when_the_present_was_clean() {
        let cases = [
            (false, PresentOutcome::Presented, false, FrameOutcome::Presented, 1),
            (true, PresentOutcome::Presented, true, FrameOutcome::Presented, 1),
            (false, PresentOutcome::Suboptimal, true, FrameOutcome::Skipped, 0),
            (true, PresentOutcome::Suboptimal, true, FrameOutcome::Skipped, 0),
            (false, PresentOutcome::OutOfDate, true, FrameOutcome::Skipped, 0),
            (true, PresentOutcome::OutOfDate, true, FrameOutcome::Skipped, 0),
        ];

        for (suboptimal, presented, stale, outcome, slot) in cases {
            let mut cursor = FrameCursor::new(MAX_FRAMES_IN_FLIGHT);
            assert_eq!(
                apply(&mut cursor, suboptimal, presented),
                (stale, outcome),
                "acquire suboptimal={suboptimal}, present={presented:?}"
            );
            assert_eq!(cursor.current(), slot);
        }
    }

    #[test]
    fn stale_presents_hold_the_slot_across_a_sequence() {
        let mut cursor = FrameCursor::new(MAX_FRAMES_IN_FLIGHT);
        let frames = [
            (false, PresentOutcome::Presented),
            (false, PresentOutcome::OutOfDate),
            (false, PresentOutcome::Suboptimal),
            (true, PresentOutcome::Presented),
            (false, PresentOutcome::Presented),
        ];

        let slots = frames
            .iter()
            .map(|&(suboptimal, presented)| {
                apply(&mut cursor, suboptimal, presented);
                cursor.current()
            })
            .collect::<Vec<_>>();
        assert_eq!(slots, vec![1, 1, 1, 0, 1]);
    }
}
