//! Object paths of a run.
//!
//! Every path is a pure function of `(run_id, stage, index)`. Indexes are
//! zero-padded so lexicographic listing order matches index order.
//!
//! ```text
//! runs/{run}/manifest.json
//! runs/{run}/stopwords
//! runs/{run}/read/{source}
//! runs/{run}/map/{source}
//! runs/{run}/shuf/{bucket}/{source}
//! runs/{run}/result/{bucket}
//! {output_prefix}{run}.txt
//! ```

use crate::types::{RunId, Stage};

/// Root of all run namespaces.
pub const RUNS_ROOT: &str = "runs/";

/// Width of zero-padded indexes.
const INDEX_WIDTH: usize = 5;

fn index(i: usize) -> String {
    format!("{:0width$}", i, width = INDEX_WIDTH)
}

/// Namespace holding every temporary object of a run.
pub fn run_namespace(run: &RunId) -> String {
    format!("{}{}/", RUNS_ROOT, run)
}

/// Directory of the objects a stage writes for a run.
pub fn stage_dir(run: &RunId, stage: Stage) -> Option<String> {
    stage
        .object_dir()
        .map(|dir| format!("{}{}/", run_namespace(run), dir))
}

/// Run manifest.
pub fn manifest(run: &RunId) -> String {
    format!("{}manifest.json", run_namespace(run))
}

/// Stopword snapshot taken when the run started.
pub fn stopwords(run: &RunId) -> String {
    format!("{}stopwords", run_namespace(run))
}

/// Word list written by Read for one source.
pub fn read_output(run: &RunId, source: usize) -> String {
    format!("{}read/{}", run_namespace(run), index(source))
}

/// Pair list written by Map for one source.
pub fn map_output(run: &RunId, source: usize) -> String {
    format!("{}map/{}", run_namespace(run), index(source))
}

/// Prefix under which all shuffle partitions of a run live.
pub fn shuffle_dir(run: &RunId) -> String {
    format!("{}shuf/", run_namespace(run))
}

/// Prefix of all partitions destined for one bucket.
pub fn shuffle_bucket_dir(run: &RunId, bucket: usize) -> String {
    format!("{}{}/", shuffle_dir(run), index(bucket))
}

/// Partition written by Shuffle for `(bucket, source)`.
pub fn shuffle_partition(run: &RunId, bucket: usize, source: usize) -> String {
    format!("{}{}", shuffle_bucket_dir(run, bucket), index(source))
}

/// Prefix under which all reduce outputs of a run live.
pub fn result_dir(run: &RunId) -> String {
    format!("{}result/", run_namespace(run))
}

/// Group list written by Reduce for one bucket.
pub fn result_output(run: &RunId, bucket: usize) -> String {
    format!("{}{}", result_dir(run), index(bucket))
}

/// Final joined result; lives outside the run namespace and survives Clean.
pub fn final_output(output_prefix: &str, run: &RunId) -> String {
    format!("{}{}.txt", output_prefix, run)
}

/// Whether `path` lies inside the run's namespace.
pub fn belongs_to_run(path: &str, run: &RunId) -> bool {
    path.starts_with(&run_namespace(run)) && !path.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> RunId {
        RunId::parse("ab12").unwrap()
    }

    #[test]
    fn test_paths() {
        let r = run();
        assert_eq!(run_namespace(&r), "runs/ab12/");
        assert_eq!(manifest(&r), "runs/ab12/manifest.json");
        assert_eq!(read_output(&r, 3), "runs/ab12/read/00003");
        assert_eq!(map_output(&r, 3), "runs/ab12/map/00003");
        assert_eq!(shuffle_partition(&r, 2, 7), "runs/ab12/shuf/00002/00007");
        assert_eq!(result_output(&r, 11), "runs/ab12/result/00011");
        assert_eq!(final_output("output/", &r), "output/ab12.txt");
    }

    #[test]
    fn test_stage_dirs_match_outputs() {
        let r = run();
        let read = stage_dir(&r, Stage::Read).unwrap();
        assert!(read_output(&r, 0).starts_with(&read));
        let shuf = stage_dir(&r, Stage::Shuffle).unwrap();
        assert_eq!(shuf, shuffle_dir(&r));
        assert!(shuffle_partition(&r, 1, 1).starts_with(&shuf));
        assert_eq!(stage_dir(&r, Stage::Reduce).unwrap(), result_dir(&r));
        assert!(stage_dir(&r, Stage::Clean).is_none());
    }

    #[test]
    fn test_listing_order_matches_index_order() {
        let r = run();
        let mut paths: Vec<_> = [10, 2, 100, 1].iter().map(|&b| result_output(&r, b)).collect();
        paths.sort();
        assert_eq!(paths, vec![
            result_output(&r, 1),
            result_output(&r, 2),
            result_output(&r, 10),
            result_output(&r, 100),
        ]);
    }

    #[test]
    fn test_bucket_prefixes_do_not_overlap() {
        let r = run();
        assert!(!shuffle_partition(&r, 10, 0).starts_with(&shuffle_bucket_dir(&r, 1)));
    }

    #[test]
    fn test_belongs_to_run() {
        let r = run();
        assert!(belongs_to_run("runs/ab12/read/00000", &r));
        assert!(!belongs_to_run("runs/ab123/read/00000", &r));
        assert!(!belongs_to_run("runs/ab12/../zz/read", &r));
        assert!(!belongs_to_run("input/a.txt", &r));
    }

    #[test]
    fn test_final_output_outside_namespace() {
        let r = run();
        assert!(!final_output("output/", &r).starts_with(&run_namespace(&r)));
    }
}
