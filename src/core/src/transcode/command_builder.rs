use std::path::PathBuf;

use crate::configuration::types::TranscodeConfig;
use crate::transcode::types::{IngestType, SessionId};

/// Produces the argument string handed to the transcoder executable.
///
/// Implementations must only depend on the ingest type, the session id and
/// their own configuration.
pub trait CommandBuilder: Send + Sync {
    fn build_command(&self, id: SessionId, ingest_type: IngestType) -> String;
}

/// Builds ffmpeg command lines that read the ingest stream from stdin and
/// publish one HLS playlist per session (`<output_path>/<id>.m3u8`).
#[derive(Debug, Clone)]
pub struct FfmpegCommandBuilder {
    output_path: PathBuf,
    segment_duration_secs: u32,
    extra_args: String,
}

impl FfmpegCommandBuilder {
    pub fn new(config: &TranscodeConfig) -> Self {
        Self {
            output_path: config.output_path.clone(),
            segment_duration_secs: config.segment_duration_secs,
            extra_args: config.extra_args.clone(),
        }
    }

    pub fn playlist_path(&self, id: SessionId) -> PathBuf {
        self.output_path.join(format!("{}.m3u8", id))
    }

    fn input_args(ingest_type: IngestType) -> &'static str {
        match ingest_type {
            IngestType::MpegTs => "-f mpegts",
            IngestType::Mp4 => "-f mp4",
            IngestType::H264 => "-f h264",
            IngestType::Jpeg => "-f mjpeg",
        }
    }

    fn codec_args(ingest_type: IngestType) -> &'static str {
        match ingest_type {
            // Already H.264, only remux.
            IngestType::MpegTs | IngestType::Mp4 | IngestType::H264 => "-c copy",
            IngestType::Jpeg => "-c:v libx264 -preset veryfast -pix_fmt yuv420p",
        }
    }
}

impl CommandBuilder for FfmpegCommandBuilder {
    fn build_command(&self, id: SessionId, ingest_type: IngestType) -> String {
        let mut args = format!(
            "-hide_banner -loglevel warning {} -i pipe:0 {} -f hls -hls_time {} -hls_list_size 0",
            Self::input_args(ingest_type),
            Self::codec_args(ingest_type),
            self.segment_duration_secs
        );
        if !self.extra_args.trim().is_empty() {
            args.push(' ');
            args.push_str(self.extra_args.trim());
        }
        args.push(' ');
        args.push_str(&self.playlist_path(id).to_string_lossy());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(extra_args: &str) -> TranscodeConfig {
        TranscodeConfig {
            command: PathBuf::from("/usr/bin/ffmpeg"),
            log_file_path: PathBuf::from("/tmp/videoingest-logs"),
            output_path: PathBuf::from("/srv/video"),
            segment_duration_secs: 4,
            extra_args: extra_args.to_string(),
        }
    }

    #[test]
    fn mpegts_is_remuxed_into_hls() {
        let builder = FfmpegCommandBuilder::new(&config(""));
        let args = builder.build_command(42, IngestType::MpegTs);

        assert!(args.contains("-f mpegts -i pipe:0"));
        assert!(args.contains("-c copy"));
        assert!(args.contains("-hls_time 4"));
        assert!(args.ends_with("/srv/video/42.m3u8"));
    }

    #[test]
    fn jpeg_is_encoded() {
        let builder = FfmpegCommandBuilder::new(&config(""));
        let args = builder.build_command(7, IngestType::Jpeg);

        assert!(args.contains("-f mjpeg -i pipe:0"));
        assert!(args.contains("libx264"));
        assert!(!args.contains("-c copy"));
    }

    #[test]
    fn extra_args_precede_the_output() {
        let builder = FfmpegCommandBuilder::new(&config("  -hls_flags delete_segments "));
        let args = builder.build_command(1, IngestType::H264);

        let fields: Vec<&str> = args.split_whitespace().collect();
        let n = fields.len();
        assert_eq!(fields[n - 3], "-hls_flags");
        assert_eq!(fields[n - 2], "delete_segments");
        assert_eq!(fields[n - 1], "/srv/video/1.m3u8");
    }

    #[test]
    fn output_is_keyed_by_session() {
        let builder = FfmpegCommandBuilder::new(&config(""));
        assert_ne!(
            builder.build_command(1, IngestType::Mp4),
            builder.build_command(2, IngestType::Mp4)
        );
        assert_eq!(
            builder.playlist_path(2),
            PathBuf::from("/srv/video/2.m3u8")
        );
    }
}
