//! CSV loading for telemetry datasets.

use crate::data::dataset::{Dataset, FailureLabel, FeatureRow, Sample, Scalar};
use crate::error::{AppError, Result};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Resolve a client-supplied relative path inside `root`.
///
/// Absolute paths and `..` components are rejected outright. When the target
/// exists it is canonicalized so symlinks cannot lead outside `root` either;
/// a missing target is returned as is and fails later when opened.
pub fn resolve_data_path(root: &Path, requested: &str) -> Result<PathBuf> {
    let relative = Path::new(requested);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(AppError::Validation(format!(
            "data_path '{}' must be relative to the data directory",
            requested
        )));
    }

    let candidate = root.join(relative);
    if !candidate.exists() {
        return Ok(candidate);
    }

    let canonical_root = root.canonicalize()?;
    let canonical = candidate.canonicalize()?;
    if !canonical.starts_with(&canonical_root) {
        return Err(AppError::Validation(format!(
            "data_path '{}' resolves outside the data directory",
            requested
        )));
    }
    Ok(canonical)
}

/// Load a labeled dataset from a CSV file with a header row
pub fn load_csv(path: impl AsRef<Path>, target_column: &str) -> Result<Dataset> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| {
        AppError::Data(format!("Failed to open dataset {}: {}", path.display(), e))
    })?;

    let dataset = read_csv(file, target_column)?;
    info!(
        path = %path.display(),
        rows = dataset.len(),
        "Loaded dataset"
    );
    Ok(dataset)
}

/// Parse labeled CSV from any reader
pub fn read_csv<R: Read>(reader: R, target_column: &str) -> Result<Dataset> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let headers = reader.headers()?.clone();
    let target_idx = headers
        .iter()
        .position(|h| h == target_column)
        .ok_or_else(|| AppError::MissingColumn(target_column.to_string()))?;

    let mut samples = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let raw_label = record.get(target_idx).unwrap_or_default();
        let label = FailureLabel::parse(raw_label).ok_or_else(|| {
            AppError::Data(format!(
                "Row {}: target '{}' has non-binary value '{}'",
                line + 1,
                target_column,
                raw_label
            ))
        })?;

        let features: FeatureRow = headers
            .iter()
            .zip(record.iter())
            .enumerate()
            .filter(|(idx, _)| *idx != target_idx)
            .filter(|(_, (_, cell))| !cell.is_empty())
            .map(|(_, (name, cell))| (name.to_string(), Scalar::parse(cell)))
            .collect();

        samples.push(Sample::new(features, label));
    }

    debug!(rows = samples.len(), columns = headers.len(), "Parsed CSV");

    if samples.is_empty() {
        return Err(AppError::Data("Dataset contains no rows".to_string()));
    }

    Ok(Dataset::new(samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
UDI,Type,Air temperature [K],Torque [Nm],Machine failure
1,M,298.1,42.8,0
2,L,298.2,46.3,1
3,L,298.1,,0
";

    #[test]
    fn test_read_csv() {
        let dataset = read_csv(CSV.as_bytes(), "Machine failure").unwrap();

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.class_counts(), [2, 1]);

        let first = &dataset.samples()[0].features;
        assert_eq!(first.get("Type"), Some(&Scalar::Category("M".to_string())));
        assert_eq!(first.get("Torque [Nm]"), Some(&Scalar::Number(42.8)));
        assert!(!first.contains_key("Machine failure"));
    }

    #[test]
    fn test_empty_cells_are_absent() {
        let dataset = read_csv(CSV.as_bytes(), "Machine failure").unwrap();
        assert!(!dataset.samples()[2].features.contains_key("Torque [Nm]"));
    }

    #[test]
    fn test_missing_target_column() {
        let err = read_csv(CSV.as_bytes(), "failure").unwrap_err();
        assert!(matches!(err, AppError::MissingColumn(ref c) if c == "failure"));
    }

    #[test]
    fn test_non_binary_target_is_rejected() {
        let csv = "torque,failure\n1.0,2\n";
        assert!(matches!(
            read_csv(csv.as_bytes(), "failure"),
            Err(AppError::Data(_))
        ));
    }

    #[test]
    fn test_data_path_stays_inside_root() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("batches")).unwrap();
        std::fs::write(root.path().join("batches/week1.csv"), CSV).unwrap();

        let resolved = resolve_data_path(root.path(), "batches/week1.csv").unwrap();
        assert!(resolved.ends_with("batches/week1.csv"));
        assert!(load_csv(&resolved, "Machine failure").is_ok());

        let missing = resolve_data_path(root.path(), "batches/week2.csv").unwrap();
        assert_eq!(missing, root.path().join("batches/week2.csv"));
    }

    #[test]
    fn test_data_path_escapes_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        for requested in ["../secrets.csv", "batches/../../secrets.csv", "/etc/passwd"] {
            assert!(
                matches!(
                    resolve_data_path(root.path(), requested),
                    Err(AppError::Validation(_))
                ),
                "{} was accepted",
                requested
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_root_is_rejected() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("other.csv"), CSV).unwrap();
        let root = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("other.csv"), root.path().join("link.csv"))
            .unwrap();

        assert!(matches!(
            resolve_data_path(root.path(), "link.csv"),
            Err(AppError::Validation(_))
        ));
    }
}
