/// Pure scoring of candidate files against a reference track.
///
/// These functions contain NO side effects - they implement the business
/// logic for ranking what the source network offered against what the user
/// asked for. Network and queue interaction live in the handlers.
use crate::kernel::traits::{Candidate, TrackRef};

/// Score thresholds (0.0 to 1.0).
pub const SCORE_ACCEPT: f64 = 0.6;
pub const SCORE_REJECT: f64 = 0.35;

/// Weights; must sum to 1.0.
const WEIGHT_TITLE: f64 = 0.6;
const WEIGHT_QUALITY: f64 = 0.2;
const WEIGHT_AVAILABILITY: f64 = 0.1;
const WEIGHT_DURATION: f64 = 0.1;

/// Lowercased alphanumeric tokens, length >= 2.
fn tokenize(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_string())
        .collect()
}

/// Jaccard similarity over token sets.
fn token_similarity(a: &str, b: &str) -> f64 {
    let ta: std::collections::HashSet<String> = tokenize(a).into_iter().collect();
    let tb: std::collections::HashSet<String> = tokenize(b).into_iter().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    intersection / union
}

fn quality_score(candidate: &Candidate) -> f64 {
    let lossless = candidate
        .filename
        .rsplit('.')
        .next()
        .map(|ext| matches!(ext.to_lowercase().as_str(), "flac" | "wav" | "aiff"))
        .unwrap_or(false);
    if lossless {
        return 1.0;
    }
    match candidate.bit_rate {
        Some(rate) if rate >= 320 => 0.9,
        Some(rate) if rate >= 256 => 0.7,
        Some(rate) if rate >= 192 => 0.5,
        Some(_) => 0.2,
        None => 0.4,
    }
}

fn availability_score(candidate: &Candidate) -> f64 {
    if candidate.free_upload_slot {
        1.0
    } else {
        // Long peer queues make a candidate nearly worthless.
        1.0 / (1.0 + candidate.queue_length as f64)
    }
}

fn duration_score(track: &TrackRef, candidate: &Candidate) -> f64 {
    match (track.duration_secs, candidate.duration_secs) {
        (Some(want), Some(have)) => {
            let diff = (want - have).abs() as f64;
            (1.0 - diff / 30.0).clamp(0.0, 1.0)
        }
        // Unknown duration neither helps nor hurts.
        _ => 0.5,
    }
}

/// Composite score in [0, 1].
pub fn score_candidate(track: &TrackRef, candidate: &Candidate) -> f64 {
    let wanted = format!("{} {}", track.artist, track.title);
    let title = token_similarity(&wanted, &candidate.filename);

    WEIGHT_TITLE * title
        + WEIGHT_QUALITY * quality_score(candidate)
        + WEIGHT_AVAILABILITY * availability_score(candidate)
        + WEIGHT_DURATION * duration_score(track, candidate)
}

/// Best candidate at or above the accept threshold, with its score.
pub fn best_candidate<'a>(
    track: &TrackRef,
    candidates: &'a [Candidate],
) -> Option<(&'a Candidate, f64)> {
    candidates
        .iter()
        .map(|c| (c, score_candidate(track, c)))
        .filter(|(_, score)| *score >= SCORE_ACCEPT)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track() -> TrackRef {
        TrackRef {
            artist: "Aphex Twin".into(),
            title: "Xtal".into(),
            album: None,
            duration_secs: Some(294),
        }
    }

    fn candidate(filename: &str) -> Candidate {
        Candidate {
            username: "peer1".into(),
            filename: filename.into(),
            size: 30_000_000,
            bit_rate: Some(320),
            duration_secs: Some(294),
            free_upload_slot: true,
            queue_length: 0,
        }
    }

    #[test]
    fn exact_match_scores_high() {
        let c = candidate("Aphex Twin - Xtal.flac");
        let score = score_candidate(&track(), &c);
        assert!(score >= SCORE_ACCEPT, "score was {score}");
    }

    #[test]
    fn unrelated_file_scores_low() {
        let c = candidate("Various - Polka Hits Vol 3.mp3");
        let score = score_candidate(&track(), &c);
        assert!(score < SCORE_ACCEPT, "score was {score}");
    }

    #[test]
    fn lossless_beats_low_bitrate() {
        let flac = candidate("Aphex Twin - Xtal.flac");
        let mut mp3 = candidate("Aphex Twin - Xtal.mp3");
        mp3.bit_rate = Some(128);

        assert!(score_candidate(&track(), &flac) > score_candidate(&track(), &mp3));
    }

    #[test]
    fn queue_length_penalizes_busy_peers() {
        let free = candidate("Aphex Twin - Xtal.flac");
        let mut busy = candidate("Aphex Twin - Xtal.flac");
        busy.free_upload_slot = false;
        busy.queue_length = 50;

        assert!(score_candidate(&track(), &free) > score_candidate(&track(), &busy));
    }

    #[test]
    fn duration_mismatch_lowers_the_score() {
        let close = candidate("Aphex Twin - Xtal.flac");
        let mut far = candidate("Aphex Twin - Xtal.flac");
        far.duration_secs = Some(100);

        assert!(score_candidate(&track(), &close) > score_candidate(&track(), &far));
    }

    #[test]
    fn best_candidate_requires_accept_threshold() {
        let candidates = vec![
            candidate("Something Else Entirely.mp3"),
            candidate("Aphex Twin - Xtal.flac"),
        ];
        let (best, score) = best_candidate(&track(), &candidates).unwrap();
        assert_eq!(best.filename, "Aphex Twin - Xtal.flac");
        assert!(score >= SCORE_ACCEPT);

        let junk = vec![candidate("Polka Hits.mp3")];
        assert!(best_candidate(&track(), &junk).is_none());
    }

    #[test]
    fn tokenize_strips_punctuation_and_case() {
        assert_eq!(tokenize("Aphex-Twin_XTAL!"), vec!["aphex", "twin", "xtal"]);
    }
}
