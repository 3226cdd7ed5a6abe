use image::{imageops, RgbImage};
use std::collections::VecDeque;

use super::keyboard::RenderedStep;
use crate::audio::spectral::TimeAxis;
use crate::error::{PipelineError, Result};

/// Size of an assembled frame: a scrolling piano roll of `steps_per_second`
/// upcoming rows, each `stretch` pixels high, stacked over the keyboard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub keyboard_height: u32,
    pub steps_per_second: usize,
    pub stretch: u32,
}

impl FrameGeometry {
    pub fn new(times: &TimeAxis, width: u32, keyboard_height: u32) -> Result<Self> {
        let steps_per_second = times.steps_per_second();
        if steps_per_second == 0 {
            return Err(PipelineError::config(format!(
                "{} steps over {:.2}s is less than one step per second",
                times.len(),
                times.duration()
            )));
        }

        // aim for 16:9 overall
        let target_height = width * 9 / 16;
        let stretch = target_height.saturating_sub(keyboard_height) / steps_per_second as u32;
        if stretch == 0 {
            return Err(PipelineError::config(format!(
                "a {}x{} keyboard leaves no room for {} roll rows per frame",
                width, keyboard_height, steps_per_second
            )));
        }

        Ok(Self {
            width,
            keyboard_height,
            steps_per_second,
            stretch,
        })
    }

    pub fn roll_height(&self) -> u32 {
        self.steps_per_second as u32 * self.stretch
    }

    pub fn frame_height(&self) -> u32 {
        self.roll_height() + self.keyboard_height
    }
}

/// Receives finished frames in index order.
pub trait FrameSink {
    fn accept(&mut self, index: usize, frame: RgbImage) -> Result<()>;
}

/// Composes full frames from rendered steps with a lookahead of exactly
/// `steps_per_second` steps. Never holds more than that many steps.
pub struct FrameAssembler<'s, S: FrameSink> {
    geometry: FrameGeometry,
    pending: VecDeque<RenderedStep>,
    next_index: usize,
    sink: &'s mut S,
}

impl<'s, S: FrameSink> FrameAssembler<'s, S> {
    pub fn new(geometry: FrameGeometry, sink: &'s mut S) -> Self {
        Self {
            geometry,
            pending: VecDeque::with_capacity(geometry.steps_per_second),
            next_index: 0,
            sink,
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Queue the next step. Emits the oldest pending frame once its whole
    /// lookahead window has arrived.
    pub fn push(&mut self, step: RenderedStep) -> Result<()> {
        self.pending.push_back(step);
        if self.pending.len() == self.geometry.steps_per_second {
            self.emit_front()?;
        }
        Ok(())
    }

    /// Flush the remaining steps, padding their windows with black rows.
    /// Returns the number of frames emitted in total.
    pub fn finish(mut self) -> Result<usize> {
        while !self.pending.is_empty() {
            self.emit_front()?;
        }
        Ok(self.next_index)
    }

    fn emit_front(&mut self) -> Result<()> {
        let frame = self.compose();
        self.sink.accept(self.next_index, frame)?;
        self.pending.pop_front();
        self.next_index += 1;
        Ok(())
    }

    fn compose(&self) -> RgbImage {
        let g = &self.geometry;
        let mut frame = RgbImage::new(g.width, g.frame_height());

        for (offset, step) in self.pending.iter().enumerate() {
            // offset 0 sits just above the keyboard, the farthest row on top
            let top = (g.steps_per_second - 1 - offset) as u32 * g.stretch;
            for dy in 0..g.stretch {
                imageops::replace(&mut frame, &step.roll_row, 0, (top + dy) as i64);
            }
        }
        if let Some(current) = self.pending.front() {
            imageops::replace(&mut frame, &current.keyboard, 0, g.roll_height() as i64);
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const W: u32 = 32;
    const KB_H: u32 = 10;

    #[derive(Default)]
    struct Collect {
        frames: Vec<(usize, RgbImage)>,
    }

    impl FrameSink for Collect {
        fn accept(&mut self, index: usize, frame: RgbImage) -> Result<()> {
            self.frames.push((index, frame));
            Ok(())
        }
    }

    /// Step `t` has roll rows with red = t + 1 and a keyboard with blue = t + 1.
    fn step(t: usize) -> RenderedStep {
        let v = t as u8 + 1;
        RenderedStep {
            keyboard: RgbImage::from_pixel(W, KB_H, Rgb([0, 0, v])),
            roll_row: RgbImage::from_pixel(W, 1, Rgb([v, 0, 0])),
        }
    }

    fn geometry() -> FrameGeometry {
        // 8 steps over 2 s
        FrameGeometry::new(&TimeAxis::linspace(8, 2.0), W, KB_H).unwrap()
    }

    #[test]
    fn geometry_follows_aspect_target() {
        let g = geometry();
        assert_eq!(g.steps_per_second, 4);
        assert_eq!(g.stretch, 2);
        assert_eq!(g.roll_height(), 8);
        assert_eq!(g.frame_height(), 18);
    }

    #[test]
    fn degenerate_geometry_is_a_configuration_error() {
        let err = FrameGeometry::new(&TimeAxis::linspace(8, 2.0), W, 40).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        let err = FrameGeometry::new(&TimeAxis::linspace(1, 2.0), W, KB_H).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn one_frame_per_step_in_order() {
        let mut sink = Collect::default();
        let mut asm = FrameAssembler::new(geometry(), &mut sink);
        for t in 0..8 {
            asm.push(step(t)).unwrap();
        }
        assert_eq!(asm.finish().unwrap(), 8);
        let indices: Vec<usize> = sink.frames.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, (0..8).collect::<Vec<_>>());
        assert!(sink.frames.iter().all(|(_, f)| f.dimensions() == (W, 18)));
    }

    #[test]
    fn roll_shows_future_on_top() {
        let mut sink = Collect::default();
        let mut asm = FrameAssembler::new(geometry(), &mut sink);
        for t in 0..8 {
            asm.push(step(t)).unwrap();
        }
        asm.finish().unwrap();

        let (_, frame) = &sink.frames[2];
        // rows 2..6 reversed, two pixels each
        let reds: Vec<u8> = (0..8).map(|y| frame.get_pixel(5, y).0[0]).collect();
        assert_eq!(reds, vec![6, 6, 5, 5, 4, 4, 3, 3]);
        assert_eq!(frame.get_pixel(5, 8).0, [0, 0, 3]);
        assert_eq!(frame.get_pixel(5, 17).0, [0, 0, 3]);
    }

    #[test]
    fn rows_past_the_end_are_black() {
        let mut sink = Collect::default();
        let mut asm = FrameAssembler::new(geometry(), &mut sink);
        for t in 0..8 {
            asm.push(step(t)).unwrap();
        }
        asm.finish().unwrap();

        let (_, last) = &sink.frames[7];
        let reds: Vec<u8> = (0..8).map(|y| last.get_pixel(0, y).0[0]).collect();
        assert_eq!(reds, vec![0, 0, 0, 0, 0, 0, 8, 8]);
        assert_eq!(last.get_pixel(0, 9).0, [0, 0, 8]);
    }

    #[test]
    fn lookahead_is_bounded() {
        let mut sink = Collect::default();
        let mut asm = FrameAssembler::new(geometry(), &mut sink);
        for t in 0..8 {
            asm.push(step(t)).unwrap();
            assert!(asm.in_flight() < asm.geometry().steps_per_second);
        }
        asm.finish().unwrap();
        assert_eq!(sink.frames.len(), 8);
    }

    #[test]
    fn short_run_still_flushes() {
        let mut sink = Collect::default();
        let mut asm = FrameAssembler::new(geometry(), &mut sink);
        asm.push(step(0)).unwrap();
        asm.push(step(1)).unwrap();
        assert_eq!(asm.finish().unwrap(), 2);
        assert_eq!(sink.frames.len(), 2);
    }
}
