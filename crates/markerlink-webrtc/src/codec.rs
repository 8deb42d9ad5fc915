use bytes::{Buf, BufMut, Bytes, BytesMut};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat};
use markerlink_core::{CodecError, Frame, Resolution, TimeBase, BGR_BYTES_PER_PIXEL};

pub const FRAME_HEADER_BYTES: usize = 24;

/// BGR24 ⇄ RGB24; the swap is its own inverse.
pub fn swap_red_blue(pixels: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixels.len());
    for px in pixels.chunks_exact(BGR_BYTES_PER_PIXEL) {
        out.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    out
}

/// Header + PNG body for one frame. CPU-bound; call from a blocking context.
pub fn encode_frame(frame: &Frame) -> Result<Bytes, CodecError> {
    let rgb = swap_red_blue(&frame.data);

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(&rgb, frame.width(), frame.height(), ExtendedColorType::Rgb8)
        .map_err(|e| CodecError::Image(e.to_string()))?;

    let mut out = BytesMut::with_capacity(FRAME_HEADER_BYTES + png.len());
    out.put_u64(frame.pts);
    out.put_u32(frame.time_base.num);
    out.put_u32(frame.time_base.den);
    out.put_u32(frame.width());
    out.put_u32(frame.height());
    out.extend_from_slice(&png);
    Ok(out.freeze())
}

pub fn decode_frame(mut payload: &[u8]) -> Result<Frame, CodecError> {
    if payload.len() < FRAME_HEADER_BYTES {
        return Err(CodecError::Truncated { len: payload.len() });
    }
    let pts = payload.get_u64();
    let time_base = TimeBase { num: payload.get_u32(), den: payload.get_u32() };
    let resolution = Resolution::new(payload.get_u32(), payload.get_u32());

    let rgb = image::load_from_memory_with_format(payload, ImageFormat::Png)
        .map_err(|e| CodecError::Image(e.to_string()))?
        .to_rgb8();
    if rgb.dimensions() != (resolution.width, resolution.height) {
        let (w, h) = rgb.dimensions();
        return Err(CodecError::Image(format!(
            "header says {resolution}, image is {w}×{h}"
        )));
    }

    Frame::bgr(swap_red_blue(rgb.as_raw()), resolution, pts, time_base)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, 200]);
            }
        }
        Frame::bgr(data, Resolution::new(width, height), 9_000, TimeBase::VIDEO_90KHZ).unwrap()
    }

    #[test]
    fn frame_survives_the_channel() {
        let frame = gradient(16, 8);
        let payload = encode_frame(&frame).unwrap();
        let back = decode_frame(&payload).unwrap();

        assert_eq!(back.pts, 9_000);
        assert_eq!(back.time_base, TimeBase::VIDEO_90KHZ);
        assert_eq!(back.resolution, Resolution::new(16, 8));
        assert_eq!(back.data, frame.data);
        assert_eq!(back.pixel(3, 5), Some([3, 5, 200]));
    }

    #[test]
    fn header_is_big_endian() {
        let payload = encode_frame(&gradient(2, 1)).unwrap();
        assert_eq!(&payload[..8], &9_000u64.to_be_bytes());
        assert_eq!(&payload[12..16], &90_000u32.to_be_bytes());
        assert_eq!(&payload[16..20], &2u32.to_be_bytes());
    }

    #[test]
    fn short_payload_is_truncated() {
        assert!(matches!(decode_frame(&[0u8; 10]), Err(CodecError::Truncated { len: 10 })));
    }

    #[test]
    fn garbage_body_is_rejected() {
        let mut payload = vec![0u8; FRAME_HEADER_BYTES];
        payload.extend_from_slice(b"definitely not a png");
        assert!(matches!(decode_frame(&payload), Err(CodecError::Image(_))));
    }
}
