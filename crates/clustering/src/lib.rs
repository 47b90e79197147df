//! Groups low-confidence words from a first-pass transcript into time
//! windows worth re-transcribing with the slower second-pass model.

/// One word as produced by first-pass ASR, trimmed to the fields clustering
/// needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub confidence: f64,
}

/// A group of nearby low-confidence words plus the wider re-transcription
/// window derived from them.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub words: Vec<Word>,
    pub start_time: f64,
    pub end_time: f64,
    pub center_time: f64,
    pub average_confidence: f64,
    pub clip_start: f64,
    pub clip_end: f64,
}

impl Cluster {
    fn from_words(words: Vec<Word>, window: f64) -> Self {
        let start_time = words.first().expect("non-empty group").start;
        let end_time = words.last().expect("non-empty group").end;
        let center_time = (start_time + end_time) / 2.0;
        let average_confidence =
            words.iter().map(|w| w.confidence).sum::<f64>() / words.len() as f64;

        Self {
            clip_start: (center_time - window / 2.0).max(0.0),
            clip_end: center_time + window / 2.0,
            words,
            start_time,
            end_time,
            center_time,
            average_confidence,
        }
    }
}

/// Builds re-transcription clusters from a word-level transcript.
///
/// `confidence_threshold` selects which words are "low confidence";
/// `proximity_seconds` is the maximum gap between two low-confidence words
/// for them to share a cluster; `correction_window_seconds` is the width of
/// the re-transcription clip centered on each cluster before overlap
/// merging.
pub fn cluster(
    words: &[Word],
    confidence_threshold: f64,
    proximity_seconds: f64,
    correction_window_seconds: f64,
) -> Vec<Cluster> {
    let low_confidence: Vec<Word> = words
        .iter()
        .filter(|w| w.confidence < confidence_threshold)
        .cloned()
        .collect();

    if low_confidence.is_empty() {
        return Vec::new();
    }

    let mut groups: Vec<Vec<Word>> = Vec::new();
    let mut current = vec![low_confidence[0].clone()];

    for w in &low_confidence[1..] {
        let gap = w.start - current.last().expect("current group non-empty").end;
        if gap <= proximity_seconds {
            current.push(w.clone());
        } else {
            groups.push(std::mem::take(&mut current));
            current.push(w.clone());
        }
    }
    groups.push(current);

    let clusters: Vec<Cluster> = groups
        .into_iter()
        .map(|g| Cluster::from_words(g, correction_window_seconds))
        .collect();

    merge_overlapping(clusters)
}

/// Single left-to-right pass merging clusters whose correction windows
/// overlap. `center_time` of a merged cluster is the midpoint of the two
/// input centers, not recomputed from the merged word set — that is the
/// documented contract, not an oversight.
fn merge_overlapping(clusters: Vec<Cluster>) -> Vec<Cluster> {
    let mut out: Vec<Cluster> = Vec::with_capacity(clusters.len());
    let mut iter = clusters.into_iter();

    let Some(mut current) = iter.next() else {
        return out;
    };

    for next in iter {
        if current.clip_end >= next.clip_start {
            let current_count = current.words.len() as f64;
            let next_count = next.words.len() as f64;
            let total = current_count + next_count;

            let average_confidence = (current.average_confidence * current_count
                + next.average_confidence * next_count)
                / total;

            let mut words = current.words;
            words.extend(next.words);

            current = Cluster {
                start_time: current.start_time.min(next.start_time),
                end_time: current.end_time.max(next.end_time),
                clip_start: current.clip_start.min(next.clip_start),
                clip_end: current.clip_end.max(next.clip_end),
                center_time: (current.center_time + next.center_time) / 2.0,
                average_confidence,
                words,
            };
        } else {
            out.push(current);
            current = next;
        }
    }
    out.push(current);

    out
}
