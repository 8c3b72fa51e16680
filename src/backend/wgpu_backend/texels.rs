//! Conversion between `Rgba32FImage` and texture bytes

use crate::backend::traits::{BackendError, BackendResult};
use crate::backend::types::TextureFormat;
use half::f16;
use image::{Rgba, Rgba32FImage};

fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn linear_to_srgb(value: f32) -> f32 {
    if value <= 0.0031308 {
        value * 12.92
    } else {
        1.055 * value.powf(1.0 / 2.4) - 0.055
    }
}

fn srgb_to_linear(value: f32) -> f32 {
    if value <= 0.04045 {
        value / 12.92
    } else {
        ((value + 0.055) / 1.055).powf(2.4)
    }
}

/// Host pixels are linear; sRGB formats store encoded color and linear alpha
fn encode_srgb(r: f32, g: f32, b: f32) -> [u8; 3] {
    [r, g, b].map(|c| unorm8(linear_to_srgb(c.clamp(0.0, 1.0))))
}

fn decode_srgb(c: u8) -> f32 {
    srgb_to_linear(c as f32 / 255.0)
}

/// Tightly packed texel rows in `format`
pub(super) fn encode(pixels: &Rgba32FImage, format: TextureFormat) -> BackendResult<Vec<u8>> {
    let mut data = Vec::with_capacity(pixels.len() * format.bytes_per_pixel() as usize / 4);
    for Rgba([r, g, b, a]) in pixels.pixels().copied() {
        match format {
            TextureFormat::Rgba8Unorm => {
                data.extend_from_slice(&[unorm8(r), unorm8(g), unorm8(b), unorm8(a)]);
            }
            TextureFormat::Bgra8Unorm => {
                data.extend_from_slice(&[unorm8(b), unorm8(g), unorm8(r), unorm8(a)]);
            }
            TextureFormat::Rgba8UnormSrgb => {
                let [r, g, b] = encode_srgb(r, g, b);
                data.extend_from_slice(&[r, g, b, unorm8(a)]);
            }
            TextureFormat::Bgra8UnormSrgb => {
                let [r, g, b] = encode_srgb(r, g, b);
                data.extend_from_slice(&[b, g, r, unorm8(a)]);
            }
            TextureFormat::Rgba16Float => {
                let halves = [r, g, b, a].map(f16::from_f32);
                data.extend_from_slice(bytemuck::cast_slice(&halves));
            }
            TextureFormat::Rgba32Float => {
                data.extend_from_slice(bytemuck::cast_slice(&[r, g, b, a]));
            }
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8 => {
                return Err(BackendError::ReadbackFailed(format!(
                    "{:?} has no color texels",
                    format
                )));
            }
        }
    }
    Ok(data)
}

/// Decode rows of `padded_row` bytes, as produced by a texture-to-buffer copy
pub(super) fn decode(
    data: &[u8],
    width: u32,
    height: u32,
    padded_row: u32,
    format: TextureFormat,
) -> BackendResult<Rgba32FImage> {
    let texel_size = format.bytes_per_pixel() as usize;
    if format.is_depth() {
        return Err(BackendError::ReadbackFailed(format!(
            "{:?} has no color texels",
            format
        )));
    }
    if data.len() < padded_row as usize * height as usize {
        return Err(BackendError::ReadbackFailed(format!(
            "expected {} bytes, got {}",
            padded_row as usize * height as usize,
            data.len()
        )));
    }

    let mut image = Rgba32FImage::new(width, height);
    for (y, row) in data.chunks(padded_row as usize).take(height as usize).enumerate() {
        for (x, texel) in row
            .chunks_exact(texel_size)
            .take(width as usize)
            .enumerate()
        {
            let rgba = match format {
                TextureFormat::Rgba8Unorm => {
                    [texel[0], texel[1], texel[2], texel[3]].map(|c| c as f32 / 255.0)
                }
                TextureFormat::Bgra8Unorm => {
                    [texel[2], texel[1], texel[0], texel[3]].map(|c| c as f32 / 255.0)
                }
                TextureFormat::Rgba8UnormSrgb => [
                    decode_srgb(texel[0]),
                    decode_srgb(texel[1]),
                    decode_srgb(texel[2]),
                    texel[3] as f32 / 255.0,
                ],
                TextureFormat::Bgra8UnormSrgb => [
                    decode_srgb(texel[2]),
                    decode_srgb(texel[1]),
                    decode_srgb(texel[0]),
                    texel[3] as f32 / 255.0,
                ],
                TextureFormat::Rgba16Float => {
                    let mut rgba = [0.0; 4];
                    for (out, bytes) in rgba.iter_mut().zip(texel.chunks_exact(2)) {
                        *out = f16::from_le_bytes([bytes[0], bytes[1]]).to_f32();
                    }
                    rgba
                }
                _ => {
                    let mut rgba = [0.0; 4];
                    for (out, bytes) in rgba.iter_mut().zip(texel.chunks_exact(4)) {
                        *out = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    }
                    rgba
                }
            };
            image.put_pixel(x as u32, y as u32, Rgba(rgba));
        }
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgra_swaps_red_and_blue() {
        let pixels = Rgba32FImage::from_pixel(1, 1, Rgba([1.0, 0.5, 0.0, 1.0]));
        let data = encode(&pixels, TextureFormat::Bgra8Unorm).unwrap();
        assert_eq!(data, vec![0, 128, 255, 255]);
    }

    #[test]
    fn srgb_formats_store_encoded_color() {
        let pixels = Rgba32FImage::from_pixel(1, 1, Rgba([0.5, 0.0, 1.0, 0.5]));
        let rgba = encode(&pixels, TextureFormat::Rgba8UnormSrgb).unwrap();
        assert_eq!(rgba, vec![188, 0, 255, 128]);
        let bgra = encode(&pixels, TextureFormat::Bgra8UnormSrgb).unwrap();
        assert_eq!(bgra, vec![255, 0, 188, 128]);

        let image = decode(&rgba, 1, 1, 4, TextureFormat::Rgba8UnormSrgb).unwrap();
        let [r, g, b, a] = image.get_pixel(0, 0).0;
        assert!((r - 0.5).abs() < 5e-3, "{r}");
        assert_eq!(g, 0.0);
        assert!((b - 1.0).abs() < 1e-6);
        assert!((a - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn decode_skips_row_padding() {
        let mut data = vec![0u8; 2 * 256];
        data[..4].copy_from_slice(&[255, 0, 0, 255]);
        data[256..260].copy_from_slice(&[0, 0, 255, 255]);

        let image = decode(&data, 1, 2, 256, TextureFormat::Rgba8Unorm).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(image.get_pixel(0, 1).0, [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn half_float_texels_survive_the_trip() {
        let pixels = Rgba32FImage::from_pixel(2, 1, Rgba([0.25, 2.0, -1.5, 1.0]));
        let data = encode(&pixels, TextureFormat::Rgba16Float).unwrap();
        assert_eq!(data.len(), 16);

        let image = decode(&data, 2, 1, 16, TextureFormat::Rgba16Float).unwrap();
        assert_eq!(image.get_pixel(1, 0).0, [0.25, 2.0, -1.5, 1.0]);
    }

    #[test]
    fn depth_is_rejected() {
        let pixels = Rgba32FImage::new(1, 1);
        assert!(encode(&pixels, TextureFormat::Depth32Float).is_err());
        assert!(decode(&[0; 4], 1, 1, 4, TextureFormat::Depth32Float).is_err());
    }
}
