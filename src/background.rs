//! Out-of-process bakes. A queue hands a scene + settings snapshot to a
//! worker and reports progress through the worker's progress file.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
};

use anyhow::{Context, Result, anyhow, bail};

use crate::{
    bake::progress::read_progress,
    scene::{Scene, save_scene_to_path},
    settings::BakeSettings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct BackgroundJob {
    pub scene: Scene,
    pub settings: BakeSettings,
    pub project_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Percent complete as last reported by the worker.
    Running(u8),
    Finished,
    /// Worker exit code; -1 when it was killed by a signal.
    Failed(i32),
}

impl JobStatus {
    pub fn is_done(self) -> bool {
        !matches!(self, JobStatus::Running(_))
    }
}

pub trait JobQueue {
    fn submit(&mut self, job: BackgroundJob) -> Result<JobId>;
    fn poll(&mut self, id: JobId) -> Result<JobStatus>;
    /// Path of the baked scene written by a finished job.
    fn fetch(&mut self, id: JobId) -> Result<PathBuf>;
    /// Stop the worker and remove its temp files.
    fn cancel(&mut self, id: JobId) -> Result<()>;
}

// ── Subprocess backend ───────────────────────────────────────────────────

struct RunningJob {
    child: Child,
    dir: PathBuf,
    progress: PathBuf,
    output: PathBuf,
    status: JobStatus,
}

/// Runs each job as `<program> bake ...` in a child process.
pub struct SubprocessQueue {
    program: PathBuf,
    root: PathBuf,
    next_id: u64,
    jobs: HashMap<JobId, RunningJob>,
}

impl SubprocessQueue {
    /// Queue that re-launches the running executable.
    pub fn new() -> Result<Self> {
        let program = std::env::current_exe().context("failed to locate current executable")?;
        Ok(Self::with_program(program))
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self {
            program: program.into(),
            root: std::env::temp_dir().join(format!("node_forge_bake_jobs_{}_{nonce}", std::process::id())),
            next_id: 1,
            jobs: HashMap::new(),
        }
    }

    /// Directory holding per-job temp files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_mut(&mut self, id: JobId) -> Result<&mut RunningJob> {
        self.jobs.get_mut(&id).ok_or_else(|| anyhow!("unknown background job {id}"))
    }
}

fn remove_dir(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        log::debug!("could not remove {}: {e}", dir.display());
    }
}

impl JobQueue for SubprocessQueue {
    fn submit(&mut self, job: BackgroundJob) -> Result<JobId> {
        let id = JobId(self.next_id);
        self.next_id += 1;

        let dir = self.root.join(id.to_string());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create job directory {}", dir.display()))?;
        let scene_path = dir.join("scene.json");
        let settings_path = dir.join("settings.json");
        let progress = dir.join("progress.txt");
        let output = dir.join("baked_scene.json");

        save_scene_to_path(&job.scene, &scene_path)?;
        let settings_text = serde_json::to_string_pretty(&job.settings).context("failed to serialize settings")?;
        std::fs::write(&settings_path, settings_text)
            .with_context(|| format!("failed to write {}", settings_path.display()))?;

        let child = Command::new(&self.program)
            .arg("bake")
            .arg("--scene")
            .arg(&scene_path)
            .arg("--settings")
            .arg(&settings_path)
            .arg("--project-dir")
            .arg(&job.project_dir)
            .arg("--progress-file")
            .arg(&progress)
            .arg("--save-scene")
            .arg(&output)
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program.display()))?;
        log::info!("submitted {id} (pid {})", child.id());

        self.jobs.insert(
            id,
            RunningJob {
                child,
                dir,
                progress,
                output,
                status: JobStatus::Running(0),
            },
        );
        Ok(id)
    }

    fn poll(&mut self, id: JobId) -> Result<JobStatus> {
        let job = self.job_mut(id)?;
        if job.status.is_done() {
            return Ok(job.status);
        }
        let exited = job
            .child
            .try_wait()
            .with_context(|| format!("failed to query {id}"))?;
        job.status = match exited {
            Some(status) if status.success() => JobStatus::Finished,
            Some(status) => JobStatus::Failed(status.code().unwrap_or(-1)),
            None => match read_progress(&job.progress) {
                Ok(p) => JobStatus::Running(p.unwrap_or(0)),
                Err(e) => {
                    log::debug!("progress for {id} unreadable: {e:#}");
                    job.status
                }
            },
        };
        Ok(job.status)
    }

    fn fetch(&mut self, id: JobId) -> Result<PathBuf> {
        match self.poll(id)? {
            JobStatus::Finished => {}
            JobStatus::Running(p) => bail!("{id} is still running ({p}%)"),
            JobStatus::Failed(code) => bail!("{id} failed with exit code {code}"),
        }
        let job = self.job_mut(id)?;
        if !job.output.exists() {
            bail!("{id} finished without writing {}", job.output.display());
        }
        Ok(job.output.clone())
    }

    fn cancel(&mut self, id: JobId) -> Result<()> {
        let Some(mut job) = self.jobs.remove(&id) else {
            bail!("unknown background job {id}");
        };
        if !job.status.is_done() {
            if let Err(e) = job.child.kill() {
                log::debug!("kill {id}: {e}");
            }
            let _ = job.child.wait();
        }
        remove_dir(&job.dir);
        log::info!("cancelled {id}");
        Ok(())
    }
}

impl Drop for SubprocessQueue {
    fn drop(&mut self) {
        for (id, job) in &mut self.jobs {
            if !job.status.is_done() && matches!(job.child.try_wait(), Ok(None)) {
                log::warn!("{id} still running, leaving it to finish");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> BackgroundJob {
        BackgroundJob {
            scene: Scene::default(),
            settings: BakeSettings::default(),
            project_dir: std::env::temp_dir(),
        }
    }

    #[test]
    fn missing_program_fails_to_submit() {
        let mut queue = SubprocessQueue::with_program("/nonexistent/node-forge-baker");
        assert!(queue.submit(job()).is_err());
        remove_dir(queue.root());
    }

    #[test]
    fn unknown_job_is_an_error() {
        let mut queue = SubprocessQueue::with_program("true");
        assert!(queue.poll(JobId(42)).is_err());
        assert!(queue.cancel(JobId(42)).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn finished_job_without_output_cannot_be_fetched() {
        // `true` ignores its arguments and exits 0 without writing anything
        let mut queue = SubprocessQueue::with_program("true");
        let id = queue.submit(job()).unwrap();
        let mut status = queue.poll(id).unwrap();
        for _ in 0..200 {
            if status.is_done() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
            status = queue.poll(id).unwrap();
        }
        assert_eq!(status, JobStatus::Finished);
        assert!(queue.fetch(id).is_err());
        let dir = queue.root().join(id.to_string());
        queue.cancel(id).unwrap();
        assert!(!dir.exists());
    }
}
