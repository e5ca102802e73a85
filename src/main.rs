use std::{path::PathBuf, thread, time::Duration};

use anyhow::{Result, anyhow, bail};
use clap::{Parser, Subcommand};
use node_forge_baker::{
    background::{BackgroundJob, JobQueue, JobStatus, SubprocessQueue},
    bake::{CpuBakeHost, planned_modes, run_bake},
    material_prep::classify,
    scene::{Scene, load_scene_from_path, save_scene_to_path},
    settings::{BakeSettings, load_settings_from_path},
    validation::validate_all,
};

#[derive(Parser, Debug)]
#[command(name = "node-forge-baker", version, about = "Multi-pass texture baking over shading node graphs")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate, bake every requested pass and export
    Bake {
        #[arg(long)]
        scene: PathBuf,
        #[arg(long)]
        settings: PathBuf,
        /// Directory exports and staged textures are written under
        #[arg(long)]
        project_dir: Option<PathBuf>,
        #[arg(long)]
        progress_file: Option<PathBuf>,
        /// Write the restored scene (with export copies) here
        #[arg(long)]
        save_scene: Option<PathBuf>,
    },
    /// Run validation only and print diagnostics
    Validate {
        #[arg(long)]
        scene: PathBuf,
        #[arg(long)]
        settings: PathBuf,
    },
    /// List objects and materials with their shader classification
    Inspect {
        #[arg(long)]
        scene: PathBuf,
    },
    /// Bake in a child process and report its progress
    Background {
        #[arg(long)]
        scene: PathBuf,
        #[arg(long)]
        settings: PathBuf,
        #[arg(long)]
        project_dir: Option<PathBuf>,
        /// Copy the baked scene here when the job finishes
        #[arg(long)]
        save_scene: Option<PathBuf>,
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,
    },
}

fn load_inputs(scene: &PathBuf, settings: &PathBuf) -> Result<(Scene, BakeSettings)> {
    Ok((load_scene_from_path(scene)?, load_settings_from_path(settings)?))
}

fn project_dir_or_scene_parent(project_dir: Option<PathBuf>, scene: &PathBuf) -> PathBuf {
    project_dir.unwrap_or_else(|| {
        scene
            .parent()
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

fn run_bake_command(
    scene_path: PathBuf,
    settings_path: PathBuf,
    project_dir: Option<PathBuf>,
    progress_file: Option<PathBuf>,
    save_scene: Option<PathBuf>,
) -> Result<()> {
    let (mut scene, settings) = load_inputs(&scene_path, &settings_path)?;
    let project_dir = project_dir_or_scene_parent(project_dir, &scene_path);

    let mut host = CpuBakeHost::new();
    let outcome = run_bake(&mut scene, &settings, &project_dir, &mut host, progress_file)?;

    for name in outcome.images.names() {
        println!("[bake] image: {name}");
    }
    for skipped in &outcome.skipped {
        println!("[bake] skipped: {skipped}");
    }
    for copy in &outcome.export_copies {
        println!("[bake] export copy: {copy}");
    }
    if let Some(root) = &outcome.export_root {
        println!("[bake] exported to {}", root.display());
    }
    if let Some(path) = save_scene {
        save_scene_to_path(&scene, &path)?;
        println!("[bake] saved scene: {}", path.display());
    }
    Ok(())
}

fn run_validate_command(scene_path: PathBuf, settings_path: PathBuf) -> Result<()> {
    let (mut scene, settings) = load_inputs(&scene_path, &settings_path)?;
    let modes = planned_modes(&settings);
    match validate_all(&mut scene, &modes, &settings) {
        Ok(repaired) => {
            for name in repaired {
                println!("[validate] '{name}' would receive the placeholder material");
            }
            println!("[validate] ok ({} pass(es))", modes.len());
            Ok(())
        }
        Err(e) => {
            for d in &e.diagnostics {
                println!("[validate] {d}");
            }
            bail!("validation failed with {} problem(s)", e.diagnostics.len())
        }
    }
}

fn run_inspect_command(scene_path: PathBuf) -> Result<()> {
    let scene = load_scene_from_path(&scene_path)?;
    for obj in &scene.objects {
        let slots: Vec<&str> = obj
            .material_slots
            .iter()
            .map(|s| s.as_deref().unwrap_or("<empty>"))
            .collect();
        let (verts, tris) = obj
            .mesh
            .as_ref()
            .map_or((0, 0), |m| (m.positions.len(), m.triangles.len()));
        println!(
            "object {} ({:?}): {verts} vertices, {tris} triangles, slots [{}]",
            obj.name,
            obj.kind,
            slots.join(", ")
        );
    }
    for (name, material) in &scene.materials {
        let archetype = if material.use_nodes {
            classify(&material.graph).name()
        } else {
            "no nodes"
        };
        println!("material {name}: {archetype}, {} node(s)", material.graph.node_count());
    }
    Ok(())
}

fn run_background_command(
    scene_path: PathBuf,
    settings_path: PathBuf,
    project_dir: Option<PathBuf>,
    save_scene: Option<PathBuf>,
    poll_ms: u64,
) -> Result<()> {
    let (scene, settings) = load_inputs(&scene_path, &settings_path)?;
    let project_dir = project_dir_or_scene_parent(project_dir, &scene_path);

    let mut queue = SubprocessQueue::new()?;
    let id = queue.submit(BackgroundJob {
        scene,
        settings,
        project_dir,
    })?;

    let mut last = None;
    let status = loop {
        let status = queue.poll(id)?;
        if let JobStatus::Running(p) = status {
            if last != Some(p) {
                println!("[background] {id}: {p}%");
                last = Some(p);
            }
            thread::sleep(Duration::from_millis(poll_ms));
            continue;
        }
        break status;
    };

    let result = match status {
        JobStatus::Finished => {
            let baked = queue.fetch(id)?;
            if let Some(dest) = &save_scene {
                std::fs::copy(&baked, dest)?;
                println!("[background] saved scene: {}", dest.display());
            }
            Ok(())
        }
        JobStatus::Failed(code) => Err(anyhow!("{id} failed with exit code {code}")),
        JobStatus::Running(p) => Err(anyhow!("{id} stopped reporting at {p}%")),
    };
    queue.cancel(id)?;
    result
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Bake {
            scene,
            settings,
            project_dir,
            progress_file,
            save_scene,
        } => run_bake_command(scene, settings, project_dir, progress_file, save_scene),
        Command::Validate { scene, settings } => run_validate_command(scene, settings),
        Command::Inspect { scene } => run_inspect_command(scene),
        Command::Background {
            scene,
            settings,
            project_dir,
            save_scene,
            poll_ms,
        } => run_background_command(scene, settings, project_dir, save_scene, poll_ms),
    }
}
