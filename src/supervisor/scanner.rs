//! Worker output scanner
//!
//! Echoes every stderr line of a worker to the log, tagged with its feed, and
//! raises the feed's error flag the first time a line matches one of the
//! critical patterns.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::registry::ErrorFlags;

/// Substrings in worker output that mean the transcode is broken
pub const CRITICAL_PATTERNS: [&str; 6] = [
    "Broken pipe",
    "Error muxing",
    "Conversion failed",
    "Conversion fallida",
    "DTS",
    "illegal reordering_of_pic_nums_idc",
];

/// First critical pattern contained in `line`, if any
pub fn critical_match(line: &str) -> Option<&'static str> {
    CRITICAL_PATTERNS.iter().copied().find(|p| line.contains(p))
}

/// What a scanner saw over its lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub lines: u64,
    /// First line that raised the error flag
    pub critical_line: Option<String>,
}

/// Spawn a scanner task bound to one worker's stderr
pub fn spawn_scanner<R>(feed: String, stream: R, flags: ErrorFlags) -> JoinHandle<ScanSummary>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move { scan_output(&feed, stream, &flags).await })
}

/// Longest line held before it is emitted in pieces
pub const MAX_LINE_BYTES: usize = 8 * 1024;

/// Read `stream` until EOF or an I/O error.
///
/// Progress output ends lines with a bare carriage return, so `\r` and `\n`
/// both end a line.
pub async fn scan_output<R>(feed: &str, stream: R, flags: &ErrorFlags) -> ScanSummary
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = Vec::with_capacity(256);
    let mut summary = ScanSummary::default();

    loop {
        let chunk = match reader.fill_buf().await {
            Ok([]) => break,
            Ok(chunk) => chunk,
            Err(e) => {
                error!("Error reading worker output for {}: {}", feed, e);
                break;
            }
        };

        let room = MAX_LINE_BYTES - line.len();
        let (take, ended) = match chunk.iter().position(|&b| b == b'\r' || b == b'\n') {
            Some(i) if i <= room => (i, true),
            _ => (chunk.len().min(room), false),
        };
        line.extend_from_slice(&chunk[..take]);
        reader.consume(if ended { take + 1 } else { take });

        if ended || line.len() >= MAX_LINE_BYTES {
            scan_line(feed, &line, flags, &mut summary).await;
            line.clear();
        }
    }

    if !line.is_empty() {
        scan_line(feed, &line, flags, &mut summary).await;
    }

    debug!("Output stream for {} closed after {} lines", feed, summary.lines);
    summary
}

async fn scan_line(feed: &str, raw: &[u8], flags: &ErrorFlags, summary: &mut ScanSummary) {
    let line = String::from_utf8_lossy(raw);
    if line.trim().is_empty() {
        return;
    }

    summary.lines += 1;
    info!(target: "feedwatch::worker_output", "[{}] {}", feed, line);

    if summary.critical_line.is_some() {
        return;
    }
    if let Some(pattern) = critical_match(&line) {
        if flags.raise(feed).await {
            warn!("Critical output from {} worker ({}): {}", feed, pattern, line);
        }
        summary.critical_line = Some(line.into_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_match() {
        assert_eq!(
            critical_match("av_interleaved_write_frame(): Broken pipe"),
            Some("Broken pipe")
        );
        assert_eq!(
            critical_match("[flv @ 0x55] Non-monotonous DTS in output stream"),
            Some("DTS")
        );
        assert_eq!(critical_match("Conversion fallida!"), Some("Conversion fallida"));
        assert_eq!(critical_match("frame=  120 fps= 30 q=23.0 size=512kB"), None);
        // Patterns are case sensitive
        assert_eq!(critical_match("broken pipe"), None);
    }

    #[tokio::test]
    async fn test_clean_output_leaves_flag_unset() {
        let flags = ErrorFlags::new();
        let output: &[u8] = b"Input #0, flv, from 'rtmp://x/vant1':\n  Duration: N/A\n";

        let summary = scan_output("vant1", output, &flags).await;
        assert_eq!(summary.lines, 2);
        assert!(summary.critical_line.is_none());
        assert!(!flags.is_set("vant1").await);
    }

    #[tokio::test]
    async fn test_first_critical_line_raises_flag() {
        let flags = ErrorFlags::new();
        let output: &[u8] =
            b"frame=1\rframe=2\n[rtsp] Broken pipe\nError muxing a packet\nframe=3\n";

        let summary = scan_output("vant3", output, &flags).await;
        assert_eq!(summary.lines, 5);
        assert_eq!(summary.critical_line.as_deref(), Some("[rtsp] Broken pipe"));
        assert!(flags.is_set("vant3").await);
        assert!(!flags.is_set("vant1").await);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_tolerated() {
        let flags = ErrorFlags::new();
        let output: &[u8] = b"\xff\xfe garbage\nConversion failed!";

        let summary = scan_output("vant2", output, &flags).await;
        assert_eq!(summary.lines, 2);
        assert!(flags.is_set("vant2").await);
    }

    #[tokio::test]
    async fn test_carriage_return_lines_scanned_without_newline() {
        use tokio::io::AsyncWriteExt;

        let flags = ErrorFlags::new();
        let (mut writer, reader) = tokio::io::duplex(64);
        let scanner = spawn_scanner("vant5".to_string(), reader, flags.clone());

        for n in 0..1000 {
            writer
                .write_all(format!("frame={} fps=30\r", n).as_bytes())
                .await
                .unwrap();
        }
        writer.write_all(b"[rtsp] Broken pipe\r").await.unwrap();

        // The stream stays open: the line must be seen on its \r alone
        let mut flagged = false;
        for _ in 0..100 {
            if flags.is_set("vant5").await {
                flagged = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(flagged);

        drop(writer);
        let summary = scanner.await.unwrap();
        assert_eq!(summary.lines, 1001);
        assert_eq!(summary.critical_line.as_deref(), Some("[rtsp] Broken pipe"));
    }

    #[tokio::test]
    async fn test_overlong_line_emitted_in_pieces() {
        let flags = ErrorFlags::new();
        let mut output = vec![b'x'; MAX_LINE_BYTES * 2 + 100];
        output.extend_from_slice(b"\nError muxing a packet\n");

        let summary = scan_output("vant6", output.as_slice(), &flags).await;
        assert_eq!(summary.lines, 4);
        assert_eq!(summary.critical_line.as_deref(), Some("Error muxing a packet"));
        assert!(flags.is_set("vant6").await);
    }

    #[tokio::test]
    async fn test_spawned_scanner_ends_with_stream() {
        let flags = ErrorFlags::new();
        let output: &'static [u8] = b"one\ntwo\n";

        let summary = spawn_scanner("vant4".to_string(), output, flags)
            .await
            .unwrap();
        assert_eq!(summary.lines, 2);
    }
}
