//! Stateless pixel buffer utilities.

/// Reverse the row order of `buffer` in place.
///
/// Rows are `width * bytes_per_pixel` bytes with no padding. Buffers shorter
/// than `height` rows are left untouched. Applying it twice restores the
/// original bytes.
pub fn flip_vertical(buffer: &mut [u8], width: usize, height: usize, bytes_per_pixel: usize) {
    flip_rows(buffer, width * bytes_per_pixel, height);
}

/// Reverse the order of `height` rows of `stride` bytes each.
///
/// Returns `false` (and does nothing) if the buffer is too short.
pub fn flip_rows(buffer: &mut [u8], stride: usize, height: usize) -> bool {
    let Some(needed) = stride.checked_mul(height) else {
        return false;
    };
    if buffer.len() < needed {
        return false;
    }
    if stride == 0 {
        return true;
    }

    let rows = &mut buffer[..needed];
    for i in 0..height / 2 {
        let (head, tail) = rows.split_at_mut((height - 1 - i) * stride);
        head[i * stride..(i + 1) * stride].swap_with_slice(&mut tail[..stride]);
    }
    true
}

/// Row pitch of a `width` x `height` frame held in `available` bytes.
///
/// DIB rows are padded to `padded_stride`; producers that deliver tightly
/// packed rows get `width * bytes_per_pixel` instead.
pub fn row_stride(
    available: usize,
    width: usize,
    height: usize,
    bytes_per_pixel: usize,
    padded_stride: usize,
) -> usize {
    if available >= padded_stride * height {
        padded_stride
    } else {
        width * bytes_per_pixel
    }
}

/// Bytes needed to expand `src_len` bytes of 3-channel pixels to 4 channels.
pub fn expanded_len(src_len: usize) -> usize {
    src_len.div_ceil(3) * 4
}

/// Expand packed 3-byte pixels into 4-byte pixels with an opaque alpha byte.
///
/// Each 3-byte group of `src` becomes the same 3 bytes followed by 255. A
/// trailing group shorter than 3 bytes is zero-filled before the alpha byte.
/// Returns the number of bytes written: 0 when `src` is empty or `dst` is
/// shorter than [`expanded_len`].
pub fn expand_rgb_to_rgba_into(dst: &mut [u8], src: &[u8]) -> usize {
    let out_len = expanded_len(src.len());
    if src.is_empty() || dst.len() < out_len {
        return 0;
    }

    for (from, to) in src.chunks(3).zip(dst.chunks_exact_mut(4)) {
        to[..from.len()].copy_from_slice(from);
        to[from.len()..3].fill(0);
        to[3] = 0xFF;
    }
    out_len
}

/// Allocating form of [`expand_rgb_to_rgba_into`].
pub fn expand_rgb_to_rgba(src: &[u8]) -> Vec<u8> {
    let mut dst = vec![0u8; expanded_len(src.len())];
    expand_rgb_to_rgba_into(&mut dst, src);
    dst
}

/// Convert a bottom-up BGR(A) frame to top-down RGB24.
///
/// Capture devices deliver uncompressed frames in BGR colour order with rows
/// stored bottom-to-top, each padded to `stride` bytes. Alpha, if present,
/// is dropped. Returns an empty vector when the input is too short.
pub fn bgr_bottom_up_to_rgb(
    bgr: &[u8],
    width: usize,
    height: usize,
    bytes_per_pixel: usize,
    stride: usize,
) -> Vec<u8> {
    bgr_to_rgb(bgr, width, height, bytes_per_pixel, stride, true)
}

/// Convert a BGR(A) frame to top-down RGB24, reading rows in reverse when
/// `bottom_up` is set.
pub fn bgr_to_rgb(
    bgr: &[u8],
    width: usize,
    height: usize,
    bytes_per_pixel: usize,
    stride: usize,
    bottom_up: bool,
) -> Vec<u8> {
    if bytes_per_pixel < 3 || stride < width * bytes_per_pixel || bgr.len() < stride * height {
        return Vec::new();
    }

    let mut rgb = vec![0u8; width * 3 * height];
    for (y, dst_row) in rgb.chunks_exact_mut(width * 3).enumerate() {
        let src_y = if bottom_up { height - 1 - y } else { y };
        let src_start = src_y * stride;
        let src_row = &bgr[src_start..src_start + width * bytes_per_pixel];
        for (dst, src) in dst_row
            .chunks_exact_mut(3)
            .zip(src_row.chunks_exact(bytes_per_pixel))
        {
            dst[0] = src[2];
            dst[1] = src[1];
            dst[2] = src[0];
        }
    }
    rgb
}
