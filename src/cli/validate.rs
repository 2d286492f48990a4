//! `pipeliner validate` - Check pipeline files without running them
//!
//! Loads each file and runs structural validation: ids, `enabled` values,
//! timeouts, names, capture variables, directives and token syntax.
//!
//! ## Example
//!
//! ```bash
//! pipeliner validate pipeline.yaml
//! # Exit code 0: every file is valid
//! # Exit code 65: a definition error was found
//! ```

use super::run::load_valid_pipeline;
use anyhow::Result;
use std::path::PathBuf;

/// Validates every file, printing a summary line for each valid one
///
/// # Errors
///
/// Returns the first validation-class error.
pub fn validate_pipelines(files: &[PathBuf]) -> Result<()> {
    for file in files {
        let pipeline = load_valid_pipeline(file)?;
        tracing::debug!(file = %file.display(), "Pipeline is valid");
        println!("{}: {pipeline}", file.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_valid_and_invalid_files() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.yaml");
        let bad = dir.path().join("bad.yaml");
        fs::write(&good, "pipeline:\n  jobs:\n    - steps:\n        - run: echo ok\n").unwrap();
        fs::write(
            &bad,
            "pipeline:\n  jobs:\n    - steps:\n        - run: echo ${{ oops\n",
        )
        .unwrap();

        assert!(validate_pipelines(std::slice::from_ref(&good)).is_ok());
        let err = validate_pipelines(&[good, bad]).unwrap_err();
        assert!(err.to_string().contains("pipeline.jobs[0].steps[0]"));
    }
}
