//! FFmpeg commands for each render step.
//!
//! Every builder returns a ready [`FfmpegCommand`]; the caller decides how to
//! run it (runner, timeout, cancellation, progress).

use std::path::{Path, PathBuf};
use tokio::fs;

use vmix_models::{AudioTrack, EncodingConfig, LogoOverlay, OutputSpec, PlanEntry, ResamplingFilter, SourceVideo};

use crate::audio::{audio_filter_chain, AUDIO_FORMAT};
use crate::command::FfmpegCommand;
use crate::error::MediaResult;
use crate::filters::{filter_fit_and_pad, filter_logo_overlay, filter_normalize_stream};
use crate::transform::{segment_filter_chain, InpaintFilter};

/// Durations closer than this are treated as equal when deciding to loop.
const LOOP_SLACK: f64 = 0.05;

/// Render one plan entry into a silent intermediate at the output size.
pub fn segment_command(
    video: &SourceVideo,
    entry: &PlanEntry,
    spec: &OutputSpec,
    inpaint: &dyn InpaintFilter,
    output: impl AsRef<Path>,
) -> FfmpegCommand {
    let chain = segment_filter_chain(video, &entry.crop, &entry.text_action, spec, inpaint);
    FfmpegCommand::new(&video.path, output)
        .seek(entry.segment.start())
        .duration(entry.segment.duration())
        .video_filter(chain)
        .output_args(spec.encoding.video_args())
        .no_audio()
}

/// Concat demuxer list for `paths`, in order.
pub fn concat_list_contents(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', "'\\''")))
        .collect()
}

/// Write the concat list next to the intermediates.
pub async fn write_concat_list(paths: &[PathBuf], list: impl AsRef<Path>) -> MediaResult<()> {
    fs::write(list.as_ref(), concat_list_contents(paths)).await?;
    Ok(())
}

/// Join uniform intermediates without re-encoding.
pub fn concat_command(list: impl AsRef<Path>, output: impl AsRef<Path>) -> FfmpegCommand {
    FfmpegCommand::new(list, output).concat_list().stream_copy()
}

/// Lay `track` under the silent main video, looping either side as needed
/// and cutting both to `main_duration`.
pub fn audio_mix_command(
    video: impl AsRef<Path>,
    content_duration: f64,
    track: &AudioTrack,
    audio_duration: f64,
    main_duration: f64,
    encoding: &EncodingConfig,
    output: impl AsRef<Path>,
) -> FfmpegCommand {
    let loop_video = main_duration > content_duration + LOOP_SLACK;
    let loop_audio = audio_duration + LOOP_SLACK < main_duration;

    let mut cmd = FfmpegCommand::new(video, output);
    if loop_video {
        cmd = cmd.stream_loop();
    }
    cmd = cmd.add_input(&track.path);
    if loop_audio {
        cmd = cmd.stream_loop();
    }

    cmd = cmd
        .filter_complex(format!("[1:a]{}[a]", audio_filter_chain(track, main_duration)))
        .map("0:v")
        .map("[a]")
        .output_duration(main_duration);

    // A looped input has to be re-encoded to get clean timestamps
    cmd = if loop_video {
        cmd.output_args(encoding.video_args())
    } else {
        cmd.video_codec("copy")
    };
    cmd.output_args(encoding.audio_args())
}

/// Composite the logo over the whole main content.
pub fn logo_command(
    input: impl AsRef<Path>,
    logo: &LogoOverlay,
    spec: &OutputSpec,
    has_audio: bool,
    output: impl AsRef<Path>,
) -> FfmpegCommand {
    let cmd = FfmpegCommand::new(input, output)
        .add_input(&logo.path)
        .filter_complex(filter_logo_overlay(logo, spec.width))
        .map("[v]")
        .output_args(spec.encoding.video_args());
    if has_audio {
        cmd.map("0:a").audio_codec("copy")
    } else {
        cmd.no_audio()
    }
}

/// Append the tagline after the main content.
///
/// The tagline is fitted to the output frame. Its own audio is replaced by
/// silence when the main content has audio, so both halves always carry the
/// same streams.
pub fn tagline_command(
    main: impl AsRef<Path>,
    tagline: impl AsRef<Path>,
    tagline_duration: f64,
    spec: &OutputSpec,
    main_has_audio: bool,
    output: impl AsRef<Path>,
) -> FfmpegCommand {
    let normalize = filter_normalize_stream(spec.fps);
    let main_video = format!("[0:v]{}[mv]", normalize);
    let tagline_video = format!(
        "[1:v]{},{}[tv]",
        filter_fit_and_pad(spec.width, spec.height, ResamplingFilter::Standard),
        normalize
    );

    let cmd = FfmpegCommand::new(main, output).add_input(tagline);
    if main_has_audio {
        cmd.add_input("anullsrc=r=48000:cl=stereo")
            .input_args(["-f", "lavfi"])
            .input_args(["-t".to_string(), format!("{:.3}", tagline_duration)])
            .filter_complex(format!(
                "{main_video};{tagline_video};[0:a]{AUDIO_FORMAT}[ma];[mv][ma][tv][2:a]concat=n=2:v=1:a=1[v][a]"
            ))
            .map("[v]")
            .map("[a]")
            .output_args(spec.encoding.video_args())
            .output_args(spec.encoding.audio_args())
    } else {
        cmd.filter_complex(format!("{main_video};{tagline_video};[mv][tv]concat=n=2:v=1:a=0[v]"))
            .map("[v]")
            .output_args(spec.encoding.video_args())
            .no_audio()
    }
}

/// Encode to the delivery format.
pub fn final_encode_command(
    input: impl AsRef<Path>,
    spec: &OutputSpec,
    has_audio: bool,
    output: impl AsRef<Path>,
) -> FfmpegCommand {
    let cmd = FfmpegCommand::new(input, output)
        .video_filter(format!(
            "scale={}:{}:flags={},setsar=1",
            spec.width,
            spec.height,
            spec.resampling.ffmpeg_flags()
        ))
        .output_args(spec.final_encode_args());
    if has_audio {
        cmd.output_args(spec.encoding.audio_args())
    } else {
        cmd.no_audio()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::DelogoInpaint;
    use vmix_models::{CropDecision, PixelRect, Segment, SourceId, TextAction};

    fn joined(cmd: &FfmpegCommand) -> String {
        cmd.build_args().join(" ")
    }

    #[test]
    fn test_segment_command() {
        let video = SourceVideo {
            id: SourceId(1),
            path: PathBuf::from("/in/b.mov"),
            duration: 60.0,
            width: 1920,
            height: 1080,
            fps: 30.0,
            has_audio: true,
        };
        let entry = PlanEntry {
            segment: Segment::new(SourceId(1), 12.0, 16.5).unwrap(),
            crop: CropDecision::Crop {
                rect: PixelRect::new(656, 0, 608, 1080),
            },
            text_action: TextAction::None,
        };
        let args = joined(&segment_command(&video, &entry, &OutputSpec::default(), &DelogoInpaint, "/w/seg_000.mp4"));

        assert!(args.contains("-ss 12.000 -t 4.500 -i /in/b.mov"));
        assert!(args.contains("-vf crop=608:1080:656:0,scale=1080:1920:flags=bicubic"));
        assert!(args.contains("-an"));
        assert!(args.ends_with("/w/seg_000.mp4"));
    }

    #[test]
    fn test_concat_list_escapes_quotes() {
        let list = concat_list_contents(&[PathBuf::from("/w/a.mp4"), PathBuf::from("/w/it's.mp4")]);
        assert_eq!(list, "file '/w/a.mp4'\nfile '/w/it'\\''s.mp4'\n");
    }

    #[test]
    fn test_audio_mix_loops_video_for_longer_track() {
        let track = AudioTrack::new("/in/music.mp3");
        let cmd = audio_mix_command("/w/concat.mp4", 30.0, &track, 45.0, 45.0, &EncodingConfig::default(), "/w/audio.mp4");
        let args = joined(&cmd);

        assert!(args.contains("-stream_loop -1 -i /w/concat.mp4 -i /in/music.mp3"));
        assert!(args.contains("-t 45.000"));
        assert!(args.contains("libx264"));
        assert!(args.contains("afade=t=out:st=44.000:d=1.000"));
    }

    #[test]
    fn test_audio_mix_loops_short_track_and_copies_video() {
        let track = AudioTrack::new("/in/jingle.wav");
        let cmd = audio_mix_command("/w/concat.mp4", 30.0, &track, 12.0, 30.0, &EncodingConfig::default(), "/w/audio.mp4");
        let args = joined(&cmd);

        assert!(args.contains("-i /w/concat.mp4 -stream_loop -1 -i /in/jingle.wav"));
        assert!(args.contains("-c:v copy"));
    }

    #[test]
    fn test_tagline_with_and_without_audio() {
        let spec = OutputSpec::default();
        let with_audio = joined(&tagline_command("/w/main.mp4", "/in/tag.mp4", 3.0, &spec, true, "/w/tag.mp4"));
        assert!(with_audio.contains("-f lavfi -t 3.000 -i anullsrc=r=48000:cl=stereo"));
        assert!(with_audio.contains("concat=n=2:v=1:a=1[v][a]"));

        let silent = joined(&tagline_command("/w/main.mp4", "/in/tag.mp4", 3.0, &spec, false, "/w/tag.mp4"));
        assert!(silent.contains("concat=n=2:v=1:a=0[v]"));
        assert!(!silent.contains("anullsrc"));
    }

    #[test]
    fn test_logo_and_final_encode() {
        let spec = OutputSpec::default();
        let logo = LogoOverlay::new("/in/logo.png");
        let args = joined(&logo_command("/w/main.mp4", &logo, &spec, true, "/w/logo.mp4"));
        assert!(args.contains("-i /w/main.mp4 -i /in/logo.png"));
        assert!(args.contains("-map 0:a -c:a copy"));

        let args = joined(&final_encode_command("/w/logo.mp4", &spec, false, "/w/final.mp4"));
        assert!(args.contains("-b:v 6000k -r 30 -pix_fmt yuv420p -movflags +faststart"));
        assert!(args.contains("-an"));
    }
}
