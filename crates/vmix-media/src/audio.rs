//! Background audio: duration precedence and the audio filter chain.

use vmix_models::AudioTrack;

/// Sample format every audio stream is conformed to before concatenation.
pub const AUDIO_FORMAT: &str = "aformat=sample_rates=48000:channel_layouts=stereo";

/// Duration of the main content (everything before the tagline).
///
/// With `sync` and an audio track the audio wins: the video is looped or cut
/// to `audio_duration + extra_seconds`. Otherwise the selected content
/// decides.
pub fn resolve_main_duration(content: f64, audio: Option<(&AudioTrack, f64)>, sync: bool) -> f64 {
    match audio {
        Some((track, audio_duration)) if sync && audio_duration > 0.0 => audio_duration + track.extra_seconds.max(0.0),
        _ => content,
    }
}

/// Fade length clamped so fade-in and fade-out never overlap.
fn clamp_fade(fade: f64, duration: f64) -> f64 {
    fade.max(0.0).min(duration / 2.0)
}

/// Audio filter chain for a track played for `duration` seconds.
///
/// Gain comes first so normalization sees the intended level; the fades come
/// last so normalization cannot undo them.
pub fn audio_filter_chain(track: &AudioTrack, duration: f64) -> String {
    let mut filters = Vec::new();
    if (track.volume - 1.0).abs() > f64::EPSILON {
        filters.push(format!("volume={:.3}", track.volume.max(0.0)));
    }
    if track.normalize {
        filters.push("loudnorm=I=-16:TP=-1.5:LRA=11".to_string());
    }
    filters.push(AUDIO_FORMAT.to_string());

    let fade_in = clamp_fade(track.fade_in, duration);
    if fade_in > 0.0 {
        filters.push(format!("afade=t=in:st=0:d={:.3}", fade_in));
    }
    let fade_out = clamp_fade(track.fade_out, duration);
    if fade_out > 0.0 {
        filters.push(format!("afade=t=out:st={:.3}:d={:.3}", duration - fade_out, fade_out));
    }

    filters.join(",")
}
