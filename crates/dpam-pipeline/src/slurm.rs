// crates/dpam-pipeline/src/slurm.rs

//! SLURM submission script emission.
//!
//! Two shapes: an array job with one task per protein (`dpam run` under
//! `--resume`), and a single-node step-first job driving `dpam batch-run`.
//! Scheduling is the cluster's problem; this module only writes the script
//! and, when asked, hands it to `sbatch`.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

/// Array-job parameters.
#[derive(Clone, Debug)]
pub struct ArrayJobConfig {
    pub cpus_per_task: usize,
    pub mem_per_cpu: String,
    pub time_limit: String,
    pub partition: Option<String>,
    pub array_size: usize,
}

/// Single-node batch-job parameters.
#[derive(Clone, Debug)]
pub struct BatchJobConfig {
    pub cpus: usize,
    pub mem: String,
    pub time_limit: String,
    pub partition: Option<String>,
    pub skip_addss: bool,
    pub scratch_dir: Option<PathBuf>,
    pub dali_workers: Option<usize>,
}

/// Generate the array-job script, writing the prefix list next to it.
///
/// # Errors
/// Returns an error when the prefix list cannot be written.
pub fn generate_array_script(
    prefixes: &[String],
    working_dir: &Path,
    data_dir: &Path,
    config: &ArrayJobConfig,
) -> Result<String> {
    let log_dir = working_dir.join("slurm_logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating {}", log_dir.display()))?;
    let prefix_file = working_dir.join("prefixes_array.txt");
    let body: String = prefixes.iter().map(|p| format!("{p}\n")).collect();
    fs::write(&prefix_file, body)
        .with_context(|| format!("writing {}", prefix_file.display()))?;

    let array_spec = if config.array_size > 0 {
        format!("0-{}%{}", prefixes.len().saturating_sub(1), config.array_size)
    } else {
        format!("0-{}", prefixes.len().saturating_sub(1))
    };

    let mut lines = vec![
        "#!/bin/bash".to_owned(),
        format!("#SBATCH --array={array_spec}"),
        format!("#SBATCH --cpus-per-task={}", config.cpus_per_task),
        format!("#SBATCH --mem-per-cpu={}", config.mem_per_cpu),
        format!("#SBATCH --time={}", config.time_limit),
        format!("#SBATCH --output={}/%A_%a.out", log_dir.display()),
        format!("#SBATCH --error={}/%A_%a.err", log_dir.display()),
        "#SBATCH --job-name=dpam".to_owned(),
    ];
    if let Some(partition) = &config.partition {
        lines.push(format!("#SBATCH --partition={partition}"));
    }
    lines.extend([
        String::new(),
        "# Load modules if needed".to_owned(),
        "# module load hhsuite foldseek dali dssp".to_owned(),
        String::new(),
        format!(
            "PREFIX=$(sed -n \"$((SLURM_ARRAY_TASK_ID + 1))p\" {})",
            prefix_file.display()
        ),
        String::new(),
        format!(
            "dpam run $PREFIX \\\n  --working-dir {} \\\n  --data-dir {} \\\n  --cpus $SLURM_CPUS_PER_TASK \\\n  --resume",
            working_dir.display(),
            data_dir.display()
        ),
        String::new(),
        "exit $?".to_owned(),
    ]);
    Ok(lines.join("\n"))
}

/// Generate the single-node step-first script.
///
/// # Errors
/// Returns an error when the prefix list cannot be written.
pub fn generate_batch_script(
    prefixes: &[String],
    working_dir: &Path,
    data_dir: &Path,
    config: &BatchJobConfig,
) -> Result<String> {
    let log_dir = working_dir.join("slurm_logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating {}", log_dir.display()))?;
    let prefix_file = working_dir.join("prefixes_batch.txt");
    let body: String = prefixes.iter().map(|p| format!("{p}\n")).collect();
    fs::write(&prefix_file, body)
        .with_context(|| format!("writing {}", prefix_file.display()))?;

    let mut lines = vec![
        "#!/bin/bash".to_owned(),
        format!("#SBATCH --cpus-per-task={}", config.cpus),
        format!("#SBATCH --mem={}", config.mem),
        format!("#SBATCH --time={}", config.time_limit),
        format!("#SBATCH --output={}/batch_%j.out", log_dir.display()),
        format!("#SBATCH --error={}/batch_%j.err", log_dir.display()),
        "#SBATCH --job-name=dpam-batch".to_owned(),
    ];
    if let Some(partition) = &config.partition {
        lines.push(format!("#SBATCH --partition={partition}"));
    }
    let mut command = format!(
        "dpam batch-run {} \\\n  --working-dir {} \\\n  --data-dir {} \\\n  --cpus {} \\\n  --resume",
        prefix_file.display(),
        working_dir.display(),
        data_dir.display(),
        config.cpus
    );
    if config.skip_addss {
        command.push_str(" \\\n  --skip-addss");
    }
    if let Some(scratch) = &config.scratch_dir {
        command.push_str(&format!(" \\\n  --scratch-dir {}", scratch.display()));
    }
    if let Some(workers) = config.dali_workers {
        command.push_str(&format!(" \\\n  --dali-workers {workers}"));
    }
    lines.extend([String::new(), command, String::new(), "exit $?".to_owned()]);
    Ok(lines.join("\n"))
}

/// Write a script and submit it with `sbatch`, returning the job id.
///
/// # Errors
/// Returns an error when the script cannot be written or `sbatch` fails.
pub fn submit(script: &str, script_file: &Path) -> Result<String> {
    fs::write(script_file, script)
        .with_context(|| format!("writing {}", script_file.display()))?;
    info!(script = %script_file.display(), "submitting to SLURM");
    let output = Command::new("sbatch")
        .arg(script_file)
        .output()
        .context("launching sbatch")?;
    if !output.status.success() {
        bail!(
            "sbatch failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    // Expected: "Submitted batch job 12345".
    let stdout = String::from_utf8_lossy(&output.stdout);
    let job_id = stdout
        .split_whitespace()
        .last()
        .unwrap_or_default()
        .to_owned();
    if job_id.is_empty() {
        bail!("could not parse job id from sbatch output: {stdout:?}");
    }
    info!(job_id = %job_id, "submitted");
    Ok(job_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_script_has_throttle_and_resume() {
        let tmp = tempfile::tempdir().unwrap();
        let prefixes = vec!["AF-P1".to_owned(), "AF-P2".to_owned(), "AF-P3".to_owned()];
        let script = generate_array_script(
            &prefixes,
            tmp.path(),
            Path::new("/data"),
            &ArrayJobConfig {
                cpus_per_task: 4,
                mem_per_cpu: "4G".to_owned(),
                time_limit: "4:00:00".to_owned(),
                partition: Some("compute".to_owned()),
                array_size: 100,
            },
        )
        .unwrap();
        assert!(script.contains("#SBATCH --array=0-2%100"));
        assert!(script.contains("--partition=compute"));
        assert!(script.contains("--resume"));
        assert!(tmp.path().join("prefixes_array.txt").exists());
    }

    #[test]
    fn batch_script_carries_optional_flags() {
        let tmp = tempfile::tempdir().unwrap();
        let prefixes = vec!["AF-P1".to_owned()];
        let script = generate_batch_script(
            &prefixes,
            tmp.path(),
            Path::new("/data"),
            &BatchJobConfig {
                cpus: 16,
                mem: "64G".to_owned(),
                time_limit: "24:00:00".to_owned(),
                partition: None,
                skip_addss: true,
                scratch_dir: Some(PathBuf::from("/tmp/scratch")),
                dali_workers: Some(64),
            },
        )
        .unwrap();
        assert!(script.contains("dpam batch-run"));
        assert!(script.contains("--skip-addss"));
        assert!(script.contains("--scratch-dir /tmp/scratch"));
        assert!(script.contains("--dali-workers 64"));
        assert!(!script.contains("--partition"));
    }
}
