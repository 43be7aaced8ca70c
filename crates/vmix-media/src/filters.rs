//! FFmpeg filter snippets.

use vmix_models::{LogoOverlay, LogoPosition, PixelRect, ResamplingFilter};

/// Crop a source-pixel rectangle.
pub fn filter_crop(rect: &PixelRect) -> String {
    format!("crop={}:{}:{}:{}", rect.width, rect.height, rect.x, rect.y)
}

/// Scale to an exact size.
pub fn filter_scale(width: u32, height: u32, resampling: ResamplingFilter) -> String {
    format!("scale={}:{}:flags={}", width, height, resampling.ffmpeg_flags())
}

/// Scale to fit inside `width`×`height` and pad the rest black, centred.
pub fn filter_fit_and_pad(width: u32, height: u32, resampling: ResamplingFilter) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease:flags={f},pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black",
        w = width,
        h = height,
        f = resampling.ffmpeg_flags()
    )
}

/// Interpolate a rectangle from its border.
///
/// `delogo` needs a one-pixel margin inside the frame, so the box is shrunk
/// to fit. Returns `None` when nothing is left.
pub fn filter_delogo(rect: &PixelRect, frame_w: u32, frame_h: u32) -> Option<String> {
    let x = rect.x.max(1);
    let y = rect.y.max(1);
    let x2 = rect.x2().min(frame_w.saturating_sub(1));
    let y2 = rect.y2().min(frame_h.saturating_sub(1));
    if x2 <= x + 1 || y2 <= y + 1 {
        return None;
    }
    Some(format!("delogo=x={}:y={}:w={}:h={}", x, y, x2 - x, y2 - y))
}

/// Constant frame rate, square pixels, encoder-friendly pixel format.
pub fn filter_normalize_stream(fps: u32) -> String {
    format!("fps={},setsar=1,format=yuv420p", fps)
}

/// Overlay coordinates for a logo position.
pub fn logo_position_expr(position: LogoPosition, margin: u32, vertical_offset: u32) -> (String, String) {
    let left = margin.to_string();
    let center = "(W-w)/2".to_string();
    let right = format!("W-w-{}", margin);
    let top = vertical_offset.to_string();
    let bottom = format!("H-h-{}", vertical_offset);

    match position {
        LogoPosition::TopLeft => (left, top),
        LogoPosition::TopCenter => (center, top),
        LogoPosition::TopRight => (right, top),
        LogoPosition::BottomLeft => (left, bottom),
        LogoPosition::BottomRight => (right, bottom),
    }
}

/// Filter complex compositing input 1 (the logo) over input 0.
///
/// The logo is scaled to `scale × output_width`, faded to `opacity` and
/// anchored at its position for the whole duration.
pub fn filter_logo_overlay(logo: &LogoOverlay, output_width: u32) -> String {
    let logo_width = ((logo.scale * output_width as f64).round() as u32).max(2) & !1;
    let (x, y) = logo_position_expr(logo.position, logo.margin, logo.vertical_offset);
    let opacity = logo.opacity.clamp(0.0, 1.0);

    if opacity < 1.0 {
        format!(
            "[1:v]scale={}:-2,format=rgba,colorchannelmixer=aa={:.2}[logo];[0:v][logo]overlay={}:{}:format=auto[v]",
            logo_width, opacity, x, y
        )
    } else {
        format!(
            "[1:v]scale={}:-2[logo];[0:v][logo]overlay={}:{}:format=auto[v]",
            logo_width, x, y
        )
    }
}
