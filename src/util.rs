use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::Context;
use flate2::read::MultiGzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

pub(crate) const TAB: char = '\t';

pub(crate) fn create_out_directory<T: AsRef<std::ffi::OsStr>>(
    raw_path: T,
) -> anyhow::Result<()> {
    if let Some(p) = Path::new(&raw_path).parent() {
        if !p.exists() && p != Path::new("") {
            info!("creating directory at {p:?}");
            std::fs::create_dir_all(p)?;
        }
    }
    Ok(())
}

pub(crate) fn get_ticker() -> ProgressBar {
    let ticker = ProgressBar::new_spinner();
    ticker.set_style(ProgressStyle::with_template("> {pos} {msg}").unwrap());
    ticker
}

pub(crate) fn get_master_progress_bar(n: usize) -> ProgressBar {
    ProgressBar::new(n as u64).with_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.green/yellow} {pos:>7}/{len:7} {msg}",
        )
        .unwrap()
        .progress_chars("##-"),
    )
}

fn is_gzipped_path(path: &Path) -> bool {
    path.extension().map(|ext| ext == "gz" || ext == "bgz").unwrap_or(false)
}

/// Opens a line-oriented text file, transparently decoding gzip when the
/// path ends in `.gz` or `.bgz`.
pub(crate) fn open_text_reader(
    path: &Path,
) -> anyhow::Result<Box<dyn BufRead + Send>> {
    let fh = File::open(path)
        .context(format!("failed to open {}", path.to_string_lossy()))?;
    if is_gzipped_path(path) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(fh))))
    } else {
        Ok(Box::new(BufReader::new(fh)))
    }
}

#[cfg(test)]
mod util_tests {
    use std::io::{BufRead, Write};

    use super::open_text_reader;

    #[test]
    fn test_open_text_reader_plain_and_gzip() {
        let tmp = tempfile::tempdir().unwrap();
        let plain_fp = tmp.path().join("records.txt");
        std::fs::write(&plain_fp, "a\tb\nc\td\n").unwrap();
        let lines = open_text_reader(&plain_fp)
            .unwrap()
            .lines()
            .collect::<Result<Vec<String>, _>>()
            .unwrap();
        assert_eq!(lines, vec!["a\tb".to_string(), "c\td".to_string()]);

        let gz_fp = tmp.path().join("records.txt.gz");
        let fh = std::fs::File::create(&gz_fp).unwrap();
        let mut encoder =
            flate2::write::GzEncoder::new(fh, flate2::Compression::default());
        encoder.write_all(b"a\tb\nc\td\n").unwrap();
        encoder.finish().unwrap();
        let gz_lines = open_text_reader(&gz_fp)
            .unwrap()
            .lines()
            .collect::<Result<Vec<String>, _>>()
            .unwrap();
        assert_eq!(gz_lines, lines);
    }
}
