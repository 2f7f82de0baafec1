use anyhow::Result;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tuonella_groupsort::external_sort::{sort_file, LineComparator};
use tuonella_groupsort::{ChunkBudget, ExternalSorter, GroupSortError, Phase, SortConfig};

/// Helper to create a test file with one line per entry
fn create_test_file(dir: &Path, name: &str, lines: &[String]) -> Result<PathBuf> {
    let file_path = dir.join(name);
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(&file_path, content)?;
    Ok(file_path)
}

/// Orders `name,number` lines by their number column.
struct NumericColumn;

impl LineComparator for NumericColumn {
    fn compare(&self, a: &str, b: &str) -> tuonella_groupsort::Result<Ordering> {
        let parse = |line: &str| -> tuonella_groupsort::Result<i64> {
            line.rsplit(',')
                .next()
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| {
                    GroupSortError::comparator(Phase::Sort, format!("no number in {:?}", line))
                })
        };
        Ok(parse(a)?.cmp(&parse(b)?))
    }
}

#[test]
fn test_sort_file_with_many_runs() -> Result<()> {
    let dir = TempDir::new()?;
    let lines: Vec<String> = (0..2000).map(|i| format!("row_{:06}", (i * 7919) % 2000)).collect();
    let input = create_test_file(dir.path(), "input.csv", &lines)?;
    let output = dir.path().join("sorted.csv");
    let work_dir = dir.path().join("work");

    let config = SortConfig::default()
        .with_chunk_budget(ChunkBudget::Lines(64))
        .with_max_merge_fan_in(4);
    let stats = sort_file(&input, &output, &work_dir, config)?;

    let mut expected = lines.clone();
    expected.sort();
    let sorted: Vec<String> = fs::read_to_string(&output)?.lines().map(str::to_string).collect();
    assert_eq!(sorted, expected);
    assert_eq!(stats.lines_sorted, 2000);
    assert_eq!(stats.runs_created, 32);
    assert!(stats.merge_levels >= 2);
    assert!(stats.peak_chunk_lines <= 64);
    assert!(fs::read_dir(&work_dir)?.next().is_none());

    Ok(())
}

#[test]
fn test_custom_comparator_over_file() -> Result<()> {
    let dir = TempDir::new()?;
    let lines: Vec<String> = vec!["a,10".into(), "b,-2".into(), "c,7".into(), "d,7".into()];
    let input = create_test_file(dir.path(), "input.csv", &lines)?;
    let output = dir.path().join("sorted.csv");

    let config = SortConfig::default().with_chunk_budget(ChunkBudget::Lines(1));
    let sorter = ExternalSorter::new(config)?;
    sorter.sort_file(&input, &NumericColumn, &dir.path().join("work"), &output)?;

    assert_eq!(fs::read_to_string(&output)?, "b,-2\nc,7\nd,7\na,10\n");

    Ok(())
}

#[test]
fn test_comparator_failure_is_not_masked() -> Result<()> {
    let dir = TempDir::new()?;
    let lines: Vec<String> = vec!["a,1".into(), "b,x".into(), "c,3".into()];
    let input = create_test_file(dir.path(), "input.csv", &lines)?;
    let output = dir.path().join("sorted.csv");
    let work_dir = dir.path().join("work");

    let config = SortConfig::default().with_chunk_budget(ChunkBudget::Lines(1));
    let sorter = ExternalSorter::new(config)?;
    let result = sorter.sort_file(&input, &NumericColumn, &work_dir, &output);

    match result {
        Err(GroupSortError::Comparator { phase, message, .. }) => {
            assert_eq!(phase, Phase::Sort);
            assert!(message.contains("b,x"));
        }
        other => panic!("expected comparator error, got {:?}", other),
    }
    assert!(!work_dir.exists());
    assert!(!output.exists());

    Ok(())
}

#[test]
fn test_missing_input_is_io_error() -> Result<()> {
    let dir = TempDir::new()?;
    let result = sort_file(
        &dir.path().join("absent.csv"),
        &dir.path().join("out.csv"),
        &dir.path().join("work"),
        SortConfig::default(),
    );

    assert!(matches!(result, Err(GroupSortError::Io { phase: Phase::Sort, .. })));

    Ok(())
}
