use std::path::{Path, PathBuf};
use url::Url;

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    if seconds < 1.0 {
        return format!("{}ms", (seconds * 1000.0).round() as u64);
    }

    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Sanitize filename for safe filesystem usage
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            c if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' => c,
            _ => '_',
        })
        .collect::<String>()
        .trim_matches(|c| c == '_' || c == '.')
        .to_string()
}

/// Short, filesystem-safe label for a source (last path segment or query id).
pub fn source_label(source: &str) -> String {
    let raw = match Url::parse(source) {
        Ok(url) => url
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned())
            .or_else(|| {
                url.path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_string))
                    .filter(|segment| !segment.is_empty())
            })
            .or_else(|| url.host_str().map(str::to_string))
            .unwrap_or_default(),
        Err(_) => Path::new(source)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    let decoded = urlencoding::decode(&raw)
        .map(|cow| cow.into_owned())
        .unwrap_or(raw);
    let label = sanitize_filename(&decoded);
    if label.is_empty() {
        "source".to_string()
    } else {
        label
    }
}

/// Output path for one of several sources: `digest.md` becomes `digest-<label>.md`.
pub fn output_path_for(base: &Path, source: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = match base.extension() {
        Some(ext) => format!("{}-{}.{}", stem, source_label(source), ext.to_string_lossy()),
        None => format!("{}-{}", stem, source_label(source)),
    };
    base.with_file_name(name)
}

/// Extract domain from URL for display purposes
pub fn extract_domain(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(|host| {
        // Remove 'www.' prefix if present
        host.strip_prefix("www.").unwrap_or(host).to_string()
    })
}

/// Availability of an external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCheck {
    pub name: &'static str,
    pub command: String,
    pub purpose: &'static str,
    pub available: bool,
}

/// Check if the current environment has required tools
pub async fn check_dependencies(yt_dlp: &str, ffmpeg: &str) -> Vec<ToolCheck> {
    let mut checks = Vec::new();

    checks.push(ToolCheck {
        name: "yt-dlp",
        command: yt_dlp.to_string(),
        purpose: "required for downloading from video platforms",
        available: check_command_available(yt_dlp, "--version").await,
    });

    checks.push(ToolCheck {
        name: "ffmpeg",
        command: ffmpeg.to_string(),
        purpose: "required for audio extraction",
        available: check_command_available(ffmpeg, "-version").await,
    });

    checks
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str, version_flag: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg(version_flag)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1024), "1.0 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(1048576), "1.0 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.25), "250ms");
        assert_eq!(format_duration(30.0), "30s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m 1s");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Hello World!"), "Hello_World");
        assert_eq!(sanitize_filename("test/file?name"), "test_file_name");
    }

    #[test]
    fn test_source_label() {
        assert_eq!(source_label("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), "dQw4w9WgXcQ");
        assert_eq!(source_label("https://cdn.example.com/media/my%20talk.mp4"), "my_talk.mp4");
        assert_eq!(source_label("/tmp/videos/lecture one.mkv"), "lecture_one");
    }

    #[test]
    fn test_output_path_for() {
        assert_eq!(
            output_path_for(Path::new("out/digest.md"), "https://youtu.be/abc123"),
            PathBuf::from("out/digest-abc123.md")
        );
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://www.youtube.com/watch?v=123"),
            Some("youtube.com".to_string())
        );
        assert_eq!(
            extract_domain("https://vimeo.com/123"),
            Some("vimeo.com".to_string())
        );
        assert_eq!(extract_domain("invalid-url"), None);
    }

    #[tokio::test]
    async fn test_missing_tool_is_reported_unavailable() {
        let checks = check_dependencies("/no/such/yt-dlp", "/no/such/ffmpeg").await;
        assert_eq!(checks.len(), 2);
        assert!(checks.iter().all(|check| !check.available));
    }
}
