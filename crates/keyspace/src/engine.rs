use crate::Words;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// One chunk of brute-force work: enumerate `chunk_size` candidates
/// starting `part_number * chunk_size` words into the space and test
/// each against `hash`.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Hex-encoded MD5 digest to match.
    pub hash: String,
    pub symbols: Vec<String>,
    pub max_length: u32,
    pub part_number: u64,
    pub chunk_size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// Cumulative matches found so far in this chunk.
    pub answers: Vec<String>,
    pub percent: f64,
    pub status: ProgressStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    InProgress,
    Success,
    Error,
}

/// Run the brute-force engine for one chunk, streaming progress
/// snapshots: one `InProgress` snapshot per elapsed `progress_period`
/// and a final `Success` snapshot at 100 percent, or a single `Error`
/// snapshot if the inputs are unusable. Enumeration runs on a blocking
/// thread; dropping the receiver cancels it mid-chunk, in which case
/// no final snapshot is produced.
pub fn run(chunk: Chunk, progress_period: Duration) -> mpsc::Receiver<Progress> {
    let (tx, rx) = mpsc::channel(16);
    tokio::task::spawn_blocking(move || enumerate(chunk, progress_period, &tx));
    rx
}

fn enumerate(chunk: Chunk, progress_period: Duration, tx: &mpsc::Sender<Progress>) {
    if let Err(reason) = validate(&chunk) {
        tracing::error!(reason, "refusing brute-force chunk");
        let _ = tx.blocking_send(Progress {
            answers: Vec::new(),
            percent: 0.0,
            status: ProgressStatus::Error,
            reason: Some(reason.to_string()),
        });
        return;
    }

    let target = chunk.hash.to_ascii_lowercase();
    let start_index = chunk.part_number as u128 * chunk.chunk_size as u128;
    let words = Words::new(&chunk.symbols, chunk.max_length, start_index);

    let mut answers: Vec<String> = Vec::new();
    let mut processed = 0u64;
    let mut last_snapshot = Instant::now();

    for word in words {
        if processed == chunk.chunk_size {
            break;
        }
        let digest = md5::compute(word.as_bytes());
        if format!("{digest:x}") == target {
            tracing::info!(part = chunk.part_number, word, "cracked candidate");
            answers.push(word);
        }
        processed += 1;

        if processed % 1_000_000 == 0 {
            tracing::debug!(part = chunk.part_number, processed, "brute force progress");
        }
        if last_snapshot.elapsed() >= progress_period && processed < chunk.chunk_size {
            let snapshot = Progress {
                answers: answers.clone(),
                percent: 100.0 * processed as f64 / chunk.chunk_size as f64,
                status: ProgressStatus::InProgress,
                reason: None,
            };
            // A send failure means the receiver was dropped: cancelled.
            if tx.blocking_send(snapshot).is_err() {
                return;
            }
            last_snapshot = Instant::now();
        }
    }

    let _ = tx.blocking_send(Progress {
        answers,
        percent: 100.0,
        status: ProgressStatus::Success,
        reason: None,
    });
}

fn validate(chunk: &Chunk) -> Result<(), &'static str> {
    if chunk.symbols.is_empty() {
        return Err("alphabet must not be empty");
    }
    if chunk.max_length == 0 {
        return Err("word max length must be positive");
    }
    if chunk.chunk_size == 0 {
        return Err("chunk size must be positive");
    }
    if chunk.hash.len() != 32 || !chunk.hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err("hash must be a hex-encoded MD5 digest");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(alphabet: &str) -> Vec<String> {
        alphabet.chars().map(String::from).collect()
    }

    fn md5_hex(word: &str) -> String {
        format!("{:x}", md5::compute(word.as_bytes()))
    }

    async fn collect(mut rx: mpsc::Receiver<Progress>) -> Vec<Progress> {
        let mut out = Vec::new();
        while let Some(progress) = rx.recv().await {
            out.push(progress);
        }
        out
    }

    #[tokio::test]
    async fn finds_the_word_in_a_single_chunk() {
        let chunk = Chunk {
            hash: md5_hex("cab"),
            symbols: symbols("abc"),
            max_length: 3,
            part_number: 0,
            chunk_size: 39,
        };
        let snapshots = collect(run(chunk, Duration::from_secs(3600))).await;

        let last = snapshots.last().unwrap();
        assert_eq!(last.status, ProgressStatus::Success);
        assert_eq!(last.percent, 100.0);
        assert_eq!(last.answers, vec!["cab".to_string()]);
    }

    #[tokio::test]
    async fn only_the_owning_chunk_finds_the_word() {
        // "cab" is word index 12 + (2*9 + 0*3 + 1) = 31: chunk 10 of 13.
        let hash = md5_hex("cab");
        for part_number in 0..13 {
            let chunk = Chunk {
                hash: hash.clone(),
                symbols: symbols("abc"),
                max_length: 3,
                part_number,
                chunk_size: 3,
            };
            let snapshots = collect(run(chunk, Duration::from_secs(3600))).await;
            let last = snapshots.last().unwrap();

            assert_eq!(last.status, ProgressStatus::Success);
            if part_number == 10 {
                assert_eq!(last.answers, vec!["cab".to_string()]);
            } else {
                assert!(last.answers.is_empty(), "part {part_number} false positive");
            }
        }
    }

    #[tokio::test]
    async fn uppercase_digest_still_matches() {
        let chunk = Chunk {
            hash: md5_hex("ba").to_ascii_uppercase(),
            symbols: symbols("ab"),
            max_length: 2,
            part_number: 0,
            chunk_size: 6,
        };
        let snapshots = collect(run(chunk, Duration::from_secs(3600))).await;
        assert_eq!(snapshots.last().unwrap().answers, vec!["ba".to_string()]);
    }

    #[tokio::test]
    async fn percent_is_monotonic() {
        let chunk = Chunk {
            hash: md5_hex("zzzz"),
            symbols: symbols("abcdefgh"),
            max_length: 4,
            part_number: 0,
            chunk_size: 4680,
        };
        // A zero period forces a snapshot per candidate.
        let snapshots = collect(run(chunk, Duration::ZERO)).await;

        assert!(snapshots.len() > 1);
        for pair in snapshots.windows(2) {
            assert!(pair[0].percent <= pair[1].percent);
        }
        assert_eq!(snapshots.last().unwrap().percent, 100.0);
    }

    #[tokio::test]
    async fn short_final_chunk_reports_success() {
        // Space of 6 words, chunk 4: part 1 covers only 2 words.
        let chunk = Chunk {
            hash: md5_hex("bb"),
            symbols: symbols("ab"),
            max_length: 2,
            part_number: 1,
            chunk_size: 4,
        };
        let snapshots = collect(run(chunk, Duration::from_secs(3600))).await;
        let last = snapshots.last().unwrap();

        assert_eq!(last.status, ProgressStatus::Success);
        assert_eq!(last.percent, 100.0);
        assert_eq!(last.answers, vec!["bb".to_string()]);
    }

    #[tokio::test]
    async fn bad_inputs_yield_one_error_snapshot() {
        let chunk = Chunk {
            hash: "not-a-digest".to_string(),
            symbols: symbols("ab"),
            max_length: 2,
            part_number: 0,
            chunk_size: 6,
        };
        let snapshots = collect(run(chunk, Duration::from_secs(3600))).await;

        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].status, ProgressStatus::Error);
        assert!(snapshots[0].reason.is_some());
    }

    #[tokio::test]
    async fn dropping_the_receiver_cancels_enumeration() {
        let chunk = Chunk {
            hash: md5_hex("zzzzzz"),
            symbols: symbols("abcdefghijklmnopqrstuvwxyz"),
            max_length: 6,
            part_number: 0,
            chunk_size: u64::MAX,
        };
        let mut rx = run(chunk, Duration::ZERO);
        let first = rx.recv().await;
        assert!(first.is_some());
        drop(rx);
        // The blocking task notices the closed channel on its next
        // send and stops; nothing further to observe here beyond not
        // hanging the test runtime.
    }
}
