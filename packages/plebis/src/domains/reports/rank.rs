//! File based aggregation behind report runs.
//!
//! Every group writes one raw line per extracted value:
//! `<row id padded to id_width><main group name><group name> <data>`.
//! Ranking drops the id column, counts lines sharing the same main and
//! group names, and orders them by count. Samples are then collected back
//! from the raw file for each ranked name.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::error::ReportError;
use super::models::report_group::ReportGroup;

/// Lines inspected per ranked name when collecting users and samples.
pub const GREP_LIMIT: usize = 101;
pub const MAX_USERS: usize = 20;
pub const MAX_REST_SAMPLES: usize = 100;
pub const REST_OVERFLOW: &str = "+";

/// Substring by character positions, clamped to the string.
fn chars_range(s: &str, start: usize, end: Option<usize>) -> String {
    let iter = s.chars().skip(start);
    match end {
        Some(end) => iter.take(end.saturating_sub(start)).collect(),
        None => iter.collect(),
    }
}

/// `raw/` and `rank/` folders of one report.
#[derive(Debug, Clone)]
pub struct ReportFolders {
    pub raw: PathBuf,
    pub rank: PathBuf,
}

impl ReportFolders {
    pub fn create(base: &Path, report_key: &str) -> Result<Self, ReportError> {
        let folder = base.join(report_key);
        let folders = Self {
            raw: folder.join("raw"),
            rank: folder.join("rank"),
        };
        fs::create_dir_all(&folders.raw).map_err(ReportError::io(&folders.raw))?;
        fs::create_dir_all(&folders.rank).map_err(ReportError::io(&folders.rank))?;
        Ok(folders)
    }

    pub fn raw_file(&self, group_key: &str) -> PathBuf {
        self.raw.join(format!("{}.dat", group_key))
    }

    pub fn rank_file(&self, group_key: &str) -> PathBuf {
        self.rank.join(format!("{}.dat", group_key))
    }
}

/// Append-only writer for a group's raw file.
pub struct RawWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl RawWriter {
    pub fn create(path: PathBuf) -> Result<Self, ReportError> {
        let file = File::create(&path).map_err(ReportError::io(&path))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    pub fn write_line(&mut self, line: &str) -> Result<(), ReportError> {
        writeln!(self.writer, "{}", line).map_err(ReportError::io(&self.path))
    }

    pub fn finish(mut self) -> Result<(), ReportError> {
        self.writer.flush().map_err(ReportError::io(&self.path))
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>, ReportError> {
    let file = File::open(path).map_err(ReportError::io(path))?;
    BufReader::new(file)
        .lines()
        .collect::<Result<_, _>>()
        .map_err(ReportError::io(path))
}

/// Writes `"<count> <first line>"` for every distinct key of `raw`, biggest
/// counts first. The key is the first `compare_width` characters after the
/// id column.
pub fn generate_rank_file(
    raw: &Path,
    rank: &Path,
    id_width: usize,
    compare_width: usize,
) -> Result<(), ReportError> {
    let mut lines: Vec<String> = read_lines(raw)?
        .into_iter()
        .filter(|line| line.chars().count() > id_width)
        .map(|line| chars_range(&line, id_width, None))
        .collect();
    lines.sort();

    let mut grouped: Vec<(usize, String)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for line in lines {
        let key = chars_range(&line, 0, Some(compare_width));
        match positions.get(&key) {
            Some(&pos) => grouped[pos].0 += 1,
            None => {
                positions.insert(key, grouped.len());
                grouped.push((1, line));
            }
        }
    }
    grouped.sort_by(|a, b| b.0.cmp(&a.0));

    let file = File::create(rank).map_err(ReportError::io(rank))?;
    let mut writer = BufWriter::new(file);
    for (count, line) in grouped {
        writeln!(writer, "{} {}", count, line).map_err(ReportError::io(rank))?;
    }
    writer.flush().map_err(ReportError::io(rank))
}

/// Count and remaining text of a rank line.
pub fn parse_rank_line(line: &str) -> Option<(u64, &str)> {
    let (count, info) = line.trim_start().split_once(' ')?;
    Some((count.parse().ok()?, info))
}

/// First `max` raw lines whose text after the id column starts with
/// `prefix`.
pub fn grep_raw(raw: &Path, id_width: usize, prefix: &str, max: usize) -> Result<Vec<String>, ReportError> {
    let file = File::open(raw).map_err(ReportError::io(raw))?;
    let mut matches = Vec::new();
    for line in BufReader::new(file).lines() {
        if matches.len() >= max {
            break;
        }
        let line = line.map_err(ReportError::io(raw))?;
        if chars_range(&line, id_width, None).starts_with(prefix) {
            matches.push(line);
        }
    }
    Ok(matches)
}

/// One ranked name of a group, or the rest bucket of a main group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    pub count: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
    pub samples: Vec<(String, u64)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportErrors {
    pub fetch: Vec<String>,
}

/// Main group name → group id → entries. Reports without a main group
/// use the empty name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportResults {
    pub data: BTreeMap<String, BTreeMap<String, Vec<RankEntry>>>,
    pub errors: ReportErrors,
}

impl ReportResults {
    fn push(&mut self, main_name: &str, group_key: &str, entry: RankEntry) {
        self.data
            .entry(main_name.to_string())
            .or_default()
            .entry(group_key.to_string())
            .or_default()
            .push(entry);
    }
}

/// Adds `value` to the sample list, keeping first-seen order.
fn add_sample(samples: &mut Vec<(String, u64)>, value: String, amount: u64) {
    match samples.iter_mut().find(|(name, _)| *name == value) {
        Some((_, count)) => *count += amount,
        None => samples.push((value, amount)),
    }
}

/// Ranks one group's raw file and folds the outcome into `results`.
pub fn aggregate_group(
    folders: &ReportFolders,
    group: &ReportGroup,
    main_group: Option<&ReportGroup>,
    id_width: usize,
    results: &mut ReportResults,
) -> Result<(), ReportError> {
    let group_key = group.id.to_string();
    let width = group.width();
    let main_width = main_group.map_or(0, ReportGroup::width);
    let raw = folders.raw_file(&group_key);
    let rank = folders.rank_file(&group_key);

    generate_rank_file(&raw, &rank, id_width, width + main_width + 1)?;

    let mut rest: Vec<(String, Vec<(String, u64)>)> = Vec::new();
    for line in read_lines(&rank)? {
        let Some((count, info)) = parse_rank_line(&line) else {
            continue;
        };
        let main_name = match main_group {
            Some(_) => chars_range(info, 0, Some(main_width)).trim().to_string(),
            None => String::new(),
        };
        let name = chars_range(info, main_width, Some(main_width + width)).trim().to_string();

        let folded = group.is_whitelisted(&name)
            || (count <= group.minimum.max(0) as u64 && !group.is_blacklisted(&name));
        if folded {
            match rest.iter_mut().find(|(main, _)| *main == main_name) {
                Some((_, entries)) => entries.push((name, count)),
                None => rest.push((main_name, vec![(name, count)])),
            }
            continue;
        }

        let prefix = format!(
            "{}{} ",
            main_group.map(|m| m.format_group_name(&main_name)).unwrap_or_default(),
            group.format_group_name(&name)
        );
        let limit = (count as usize).min(GREP_LIMIT);
        let mut users: Vec<String> = Vec::new();
        let mut samples = Vec::new();
        for matched in grep_raw(&raw, id_width, &prefix, limit)? {
            let user = chars_range(&matched, 0, Some(id_width)).trim().to_string();
            if !users.contains(&user) {
                users.push(user);
            }
            let sample = chars_range(&matched, id_width + main_width + width, None).trim().to_string();
            add_sample(&mut samples, sample, 1);
        }
        users.truncate(MAX_USERS);

        results.push(
            &main_name,
            &group_key,
            RankEntry {
                count,
                name,
                users: Some(users),
                samples,
            },
        );
    }

    let label = group.minimum_label.clone().unwrap_or_default();
    for (main_name, entries) in rest {
        let count: u64 = entries.iter().map(|(_, c)| c).sum();
        let mut samples = Vec::new();
        for (name, c) in entries {
            add_sample(&mut samples, name, c);
        }
        samples.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        if samples.len() > MAX_REST_SAMPLES {
            samples.truncate(MAX_REST_SAMPLES);
            let shown: u64 = samples.iter().map(|(_, c)| c).sum();
            samples.push((REST_OVERFLOW.to_string(), count - shown));
        }
        results.push(
            &main_name,
            &group_key,
            RankEntry {
                count,
                name: label.clone(),
                users: None,
                samples,
            },
        );
    }

    tracing::debug!(group_id = %group.id, "report group aggregated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_raw(folders: &ReportFolders, group: &ReportGroup, lines: &[String]) {
        let mut writer = RawWriter::create(folders.raw_file(&group.id.to_string())).unwrap();
        for line in lines {
            writer.write_line(line).unwrap();
        }
        writer.finish().unwrap();
    }

    fn group(width: i32, minimum: i32) -> ReportGroup {
        ReportGroup {
            width,
            minimum,
            minimum_label: Some("Otros".to_string()),
            ..ReportGroup::default()
        }
    }

    fn raw_line(id: u32, group: &ReportGroup, name: &str, data: &str) -> String {
        format!("{:<3}{} {}", id, group.format_group_name(name), data)
    }

    #[test]
    fn rank_file_counts_and_orders() {
        let dir = TempDir::new().unwrap();
        let raw = dir.path().join("raw.dat");
        let rank = dir.path().join("rank.dat");
        fs::write(&raw, "1  bb x\n2  aa y\n3  bb z\n4  bb x\n5  aa y\n6  cc w\n").unwrap();

        generate_rank_file(&raw, &rank, 3, 3).unwrap();
        let content = fs::read_to_string(&rank).unwrap();
        assert_eq!(content, "3 bb x\n2 aa y\n1 cc w\n");
        assert_eq!(parse_rank_line("  3 bb x"), Some((3, "bb x")));
        assert_eq!(parse_rank_line("garbage"), None);
    }

    #[test]
    fn grep_stops_at_limit() {
        let dir = TempDir::new().unwrap();
        let raw = dir.path().join("raw.dat");
        fs::write(&raw, "1  aa 1\n2  bb 2\n3  aa 3\n4  aa 4\n").unwrap();

        let found = grep_raw(&raw, 3, "aa ", 2).unwrap();
        assert_eq!(found, vec!["1  aa 1", "3  aa 3"]);
    }

    #[test]
    fn ranked_names_collect_users_and_samples() {
        let dir = TempDir::new().unwrap();
        let folders = ReportFolders::create(dir.path(), "r1").unwrap();
        let g = group(6, 1);
        let lines = vec![
            raw_line(1, &g, "Madrid", "a"),
            raw_line(2, &g, "Madrid", "b"),
            raw_line(3, &g, "Madrid", "a"),
            raw_line(3, &g, "Madrid", "a"),
            raw_line(4, &g, "Soria", "c"),
        ];
        write_raw(&folders, &g, &lines);

        let mut results = ReportResults::default();
        aggregate_group(&folders, &g, None, 3, &mut results).unwrap();
        let entries = &results.data[""][&g.id.to_string()];

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].count, 4);
        assert_eq!(entries[0].name, "Madrid");
        assert_eq!(entries[0].users.as_deref(), Some(&["1".to_string(), "2".into(), "3".into()][..]));
        assert_eq!(entries[0].samples, vec![("a".to_string(), 3), ("b".to_string(), 1)]);

        assert_eq!(entries[1].name, "Otros");
        assert_eq!(entries[1].count, 1);
        assert!(entries[1].users.is_none());
        assert_eq!(entries[1].samples, vec![("Soria".to_string(), 1)]);
    }

    #[test]
    fn whitelist_folds_and_blacklist_keeps() {
        let dir = TempDir::new().unwrap();
        let folders = ReportFolders::create(dir.path(), "r2").unwrap();
        let mut g = group(6, 5);
        g.whitelist = Some("Madrid".to_string());
        g.blacklist = Some("Soria".to_string());
        let lines = vec![
            raw_line(1, &g, "Madrid", "a"),
            raw_line(2, &g, "Madrid", "a"),
            raw_line(3, &g, "Madrid", "a"),
            raw_line(4, &g, "Madrid", "a"),
            raw_line(5, &g, "Madrid", "a"),
            raw_line(6, &g, "Madrid", "a"),
            raw_line(7, &g, "Soria", "b"),
        ];
        write_raw(&folders, &g, &lines);

        let mut results = ReportResults::default();
        aggregate_group(&folders, &g, None, 3, &mut results).unwrap();
        let entries = &results.data[""][&g.id.to_string()];

        assert_eq!(entries[0].name, "Soria");
        assert_eq!(entries[0].users.as_deref().map(<[String]>::len), Some(1));
        assert_eq!(entries[1].name, "Otros");
        assert_eq!(entries[1].samples, vec![("Madrid".to_string(), 6)]);
    }

    #[test]
    fn main_group_splits_results() {
        let dir = TempDir::new().unwrap();
        let folders = ReportFolders::create(dir.path(), "r3").unwrap();
        let main = group(3, 0);
        let g = group(4, 0);
        let line = |id: u32, m: &str, n: &str| {
            format!("{:<3}{}{} x", id, main.format_group_name(m), g.format_group_name(n))
        };
        write_raw(&folders, &g, &[line(1, "AN", "Cadi"), line(2, "CT", "Bcn"), line(3, "CT", "Bcn")]);

        let mut results = ReportResults::default();
        aggregate_group(&folders, &g, Some(&main), 3, &mut results).unwrap();
        let key = g.id.to_string();

        assert_eq!(results.data["CT"][&key][0].count, 2);
        assert_eq!(results.data["CT"][&key][0].name, "Bcn");
        assert_eq!(results.data["AN"][&key][0].users.as_deref(), Some(&["1".to_string()][..]));
    }

    #[test]
    fn rest_keeps_hundred_biggest_samples() {
        let dir = TempDir::new().unwrap();
        let folders = ReportFolders::create(dir.path(), "r4").unwrap();
        let g = group(4, 1);
        let lines: Vec<String> = (0..105).map(|i| format!("{:<4}{:<4} x", i, i)).collect();
        write_raw(&folders, &g, &lines);

        let mut results = ReportResults::default();
        aggregate_group(&folders, &g, None, 4, &mut results).unwrap();
        let rest = &results.data[""][&g.id.to_string()][0];

        assert_eq!(rest.count, 105);
        assert_eq!(rest.samples.len(), 101);
        assert_eq!(rest.samples.last(), Some(&(REST_OVERFLOW.to_string(), 5)));
    }
}
