use markerlink_core::{Coordinates, Frame, SessionConfig, BGR_BYTES_PER_PIXEL};

/// Finds the marker in a frame. `None` means "not visible this time".
pub trait MarkerLocator: Send {
    fn locate(&mut self, frame: &Frame) -> Option<Coordinates>;
}

impl<F> MarkerLocator for F
where
    F: FnMut(&Frame) -> Option<Coordinates> + Send,
{
    fn locate(&mut self, frame: &Frame) -> Option<Coordinates> {
        self(frame)
    }
}

/// Centroid of every pixel close to the marker color.
#[derive(Debug, Clone)]
pub struct ColorCentroidLocator {
    color_bgr: [u8; 3],
    tolerance: u8,
    min_pixels: u32,
}

impl ColorCentroidLocator {
    pub fn new(color_bgr: [u8; 3], tolerance: u8, min_pixels: u32) -> Self {
        Self { color_bgr, tolerance, min_pixels: min_pixels.max(1) }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.marker.color_bgr,
            config.analysis.color_tolerance,
            config.analysis.min_pixels,
        )
    }

    fn matches(&self, px: &[u8]) -> bool {
        px.iter()
            .zip(self.color_bgr)
            .all(|(&have, want)| have.abs_diff(want) <= self.tolerance)
    }
}

impl MarkerLocator for ColorCentroidLocator {
    fn locate(&mut self, frame: &Frame) -> Option<Coordinates> {
        let width = frame.width() as u64;
        if width == 0 {
            return None;
        }

        let (mut sum_x, mut sum_y, mut count) = (0u64, 0u64, 0u64);
        for (i, px) in frame.data.chunks_exact(BGR_BYTES_PER_PIXEL).enumerate() {
            if self.matches(px) {
                let i = i as u64;
                sum_x += i % width;
                sum_y += i / width;
                count += 1;
            }
        }

        if count < self.min_pixels as u64 {
            return None;
        }
        let round = |sum: u64| ((sum + count / 2) / count) as i32;
        Some(Coordinates::new(round(sum_x), round(sum_y)))
    }
}

#[cfg(test)]
mod tests {
    use markerlink_core::{Resolution, TimeBase};

    use super::*;

    fn frame_with_block(x0: u32, y0: u32, size: u32) -> Frame {
        let res = Resolution::new(64, 64);
        let mut data = vec![0u8; 64 * 64 * 3];
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                let o = ((y * 64 + x) * 3) as usize;
                data[o..o + 3].copy_from_slice(&[250, 10, 5]);
            }
        }
        Frame::bgr(data, res, 0, TimeBase::VIDEO_90KHZ).unwrap()
    }

    #[test]
    fn finds_the_center_of_a_blue_block() {
        let mut locator = ColorCentroidLocator::new([255, 0, 0], 40, 4);
        // 5×5 block from (10, 20): center (12, 22).
        assert_eq!(locator.locate(&frame_with_block(10, 20, 5)), Some(Coordinates::new(12, 22)));
    }

    #[test]
    fn too_few_pixels_is_not_a_marker() {
        let mut locator = ColorCentroidLocator::new([255, 0, 0], 40, 16);
        assert_eq!(locator.locate(&frame_with_block(0, 0, 3)), None);
    }

    #[test]
    fn other_colors_are_ignored() {
        let mut locator = ColorCentroidLocator::new([0, 0, 255], 40, 1);
        assert_eq!(locator.locate(&frame_with_block(10, 20, 5)), None);
    }

    #[test]
    fn closures_are_locators() {
        let mut calls = 0;
        let mut fixed = |_: &Frame| {
            calls += 1;
            Some(Coordinates::new(1, 2))
        };
        assert_eq!(fixed.locate(&frame_with_block(0, 0, 1)), Some(Coordinates::new(1, 2)));
        drop(fixed);
        assert_eq!(calls, 1);
    }
}
