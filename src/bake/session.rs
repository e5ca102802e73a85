//! One bake invocation. The session owns every piece of state the passes
//! share, drives one pass per bake mode and puts the scene back the way it
//! found it, on success, on error and on drop.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};

use crate::{
    channel::{BakeMode, Channel, Presentation},
    error::TransformError,
    imaging::{
        BakedImage, ColorSpace, ImageStore, ImageTags, PixelBuffer,
        export::{export_image, export_root, output_depth, timestamp_now, write_buffer},
        pack::{PackSource, pack_channels},
        post_process::{PixelTransform, apply_transform, post_process_1to1, scale_image},
        udim,
    },
    material_prep::{prepare_bake_target, prepare_for_channel, specials::special_material},
    scene::{RenderDevice, RenderEngine, RenderSettings, Scene},
    scene_prep::{
        CopyRequest, obj_export::write_obj, prepare_export_copies, restore,
        restore::{UvCoordSnapshot, restore_original_materials},
    },
    settings::{BakeSettings, NormalConvention},
    validation::{bake_objects, validate_all},
};

use super::{
    BakeHost, BakeRequest,
    operation::BakeOperation,
    progress::ProgressFile,
};

/// Tile size used on CPU devices.
const CPU_TILE_SIZE: u32 = 64;
/// Staging directory for UDIM tiles when nothing is exported.
pub const TEXTURES_DIR: &str = "textures";

/// Bake modes an invocation runs, in order.
pub fn planned_modes(settings: &BakeSettings) -> Vec<BakeMode> {
    let mut modes = Vec::new();
    if !settings.channels.is_empty() {
        modes.push(if settings.selected_to_active {
            BakeMode::PbrSelectedToActive
        } else {
            BakeMode::Pbr
        });
    }
    if !settings.native_passes.is_empty() {
        modes.push(BakeMode::CyclesNative);
    }
    if !settings.specials.is_empty() {
        modes.push(if settings.selected_to_active && settings.specials_on_target_only {
            BakeMode::SpecialsTargetOnly
        } else {
            BakeMode::Specials
        });
    }
    modes
}

#[derive(Debug, Default)]
pub struct BakeOutcome {
    pub images: ImageStore,
    pub export_root: Option<PathBuf>,
    pub export_copies: Vec<String>,
    pub mesh_files: Vec<PathBuf>,
    /// Object/material/channel combinations that could not be isolated.
    pub skipped: Vec<String>,
    /// Objects that received the placeholder material during validation.
    pub repaired: Vec<String>,
}

/// Validate, bake every planned mode and deliver.
pub fn run_bake(
    scene: &mut Scene,
    settings: &BakeSettings,
    project_dir: &Path,
    host: &mut dyn BakeHost,
    progress_path: Option<PathBuf>,
) -> Result<BakeOutcome> {
    let modes = planned_modes(settings);
    let repaired = validate_all(scene, &modes, settings)?;

    let mut session = BakeSession::begin(scene, settings, project_dir, &modes, progress_path);
    for &mode in &modes {
        session
            .run_pass(mode, host)
            .with_context(|| format!("{} pass failed", mode.name()))?;
    }
    let mut outcome = session.finish()?;
    outcome.repaired = repaired;
    Ok(outcome)
}

// ── Bake units ───────────────────────────────────────────────────────────

/// Image a unit writes for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
struct UnitTarget {
    prefix: String,
    object: Option<String>,
    merged: Option<String>,
    /// Only triangles of this material write here (texture per material).
    material: Option<String>,
}

/// One host call per channel: receivers, optional selected-to-active
/// sources, and the images written.
#[derive(Debug, Clone)]
struct BakeUnit {
    receivers: Vec<String>,
    sources: Vec<String>,
    targets: Vec<UnitTarget>,
}

impl BakeUnit {
    fn label(&self) -> String {
        self.receivers.join("+")
    }

    /// Index of the target `material`'s triangles write into.
    fn target_index(&self, material: &str) -> usize {
        self.targets
            .iter()
            .position(|t| t.material.as_deref().is_none_or(|m| m == material))
            .unwrap_or(0)
    }
}

fn targets_for(scene: &Scene, settings: &BakeSettings, object: &str) -> Vec<UnitTarget> {
    if settings.texture_per_material {
        let mut materials: Vec<&String> = Vec::new();
        for m in scene
            .object(object)
            .into_iter()
            .flat_map(|o| o.material_slots.iter().flatten())
        {
            if !materials.contains(&m) {
                materials.push(m);
            }
        }
        if !materials.is_empty() {
            return materials
                .into_iter()
                .map(|m| UnitTarget {
                    prefix: format!("{object}_{m}"),
                    object: Some(object.to_string()),
                    merged: None,
                    material: Some(m.clone()),
                })
                .collect();
        }
    }
    vec![UnitTarget {
        prefix: object.to_string(),
        object: Some(object.to_string()),
        merged: None,
        material: None,
    }]
}

fn plan_units(scene: &Scene, settings: &BakeSettings, op: &BakeOperation) -> Vec<BakeUnit> {
    match &op.target_object {
        Some(target) => vec![BakeUnit {
            receivers: vec![target.clone()],
            sources: if op.mode == BakeMode::PbrSelectedToActive {
                op.bake_objects.clone()
            } else {
                Vec::new()
            },
            targets: targets_for(scene, settings, target),
        }],
        None if settings.merged_bake => vec![BakeUnit {
            receivers: op.bake_objects.clone(),
            sources: Vec::new(),
            targets: vec![UnitTarget {
                prefix: settings.merged_bake_name.clone(),
                object: None,
                merged: Some(settings.merged_bake_name.clone()),
                material: None,
            }],
        }],
        None => op
            .bake_objects
            .iter()
            .map(|o| BakeUnit {
                receivers: vec![o.clone()],
                sources: Vec::new(),
                targets: targets_for(scene, settings, o),
            })
            .collect(),
    }
}

/// Special maps baked through a synthesized material on a scratch copy.
fn is_synthesized(channel: Channel) -> bool {
    matches!(
        channel,
        Channel::AmbientOcclusion
            | Channel::Curvature
            | Channel::Thickness
            | Channel::VertexColor
            | Channel::MaterialId
    )
}

/// Objects the host bakes into and the selected-to-active sources.
type Prepared = (Vec<String>, Vec<String>);

// ── Session ──────────────────────────────────────────────────────────────

pub struct BakeSession<'s> {
    scene: &'s mut Scene,
    settings: &'s BakeSettings,
    project_dir: PathBuf,
    images: ImageStore,

    render_snapshot: RenderSettings,
    selection_snapshot: Vec<String>,
    active_snapshot: Option<String>,
    original_uv_active: BTreeMap<String, usize>,
    tile_uvs: Option<UvCoordSnapshot>,
    source_objects: Vec<String>,

    total_passes: usize,
    current_pass: usize,
    progress: ProgressFile,
    export_root: Option<PathBuf>,
    textures_dir: PathBuf,
    textures_dir_preexisted: bool,
    skipped: Vec<String>,
    finalized: bool,
}

impl<'s> BakeSession<'s> {
    /// Snapshot everything the passes may touch. `modes` is the full pass
    /// plan, used for progress accounting.
    pub fn begin(
        scene: &'s mut Scene,
        settings: &'s BakeSettings,
        project_dir: &Path,
        modes: &[BakeMode],
        progress_path: Option<PathBuf>,
    ) -> Self {
        let view: &Scene = scene;
        let tiles = settings.tile_count() as usize;
        let total: usize = modes
            .iter()
            .map(|&mode| {
                let op = BakeOperation::new(mode, view, settings);
                tiles * op.requested_channels.len() * plan_units(view, settings, &op).len()
            })
            .sum();

        let source_objects = bake_objects(view, settings);
        let mut uv_objects = source_objects.clone();
        uv_objects.extend(settings.target_object.clone());
        let original_uv_active = restore::capture_active_uvs(view, &uv_objects);

        let stamp = settings.export.timestamp.then(timestamp_now);
        let root = settings
            .export
            .enabled
            .then(|| export_root(project_dir, &settings.export, stamp.as_deref()));
        let textures_dir = project_dir.join(TEXTURES_DIR);

        log::info!(
            "bake session: {} pass(es), {total} bake(s), {} object(s)",
            modes.len(),
            source_objects.len()
        );
        Self {
            render_snapshot: scene.render.clone(),
            selection_snapshot: scene.selection.clone(),
            active_snapshot: scene.active_object.clone(),
            original_uv_active,
            tile_uvs: None,
            source_objects,
            scene,
            settings,
            project_dir: project_dir.to_path_buf(),
            images: ImageStore::new(),
            total_passes: modes.len(),
            current_pass: 0,
            progress: ProgressFile::new(progress_path, total),
            export_root: root,
            textures_dir_preexisted: textures_dir.exists(),
            textures_dir,
            skipped: Vec::new(),
            finalized: false,
        }
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    pub fn scene(&self) -> &Scene {
        self.scene
    }

    pub fn progress(&self) -> &ProgressFile {
        &self.progress
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// INIT, BAKE and RESTORE_MATERIALS for one mode, then post-process and
    /// export the pass's images. Materials are restored even when the host
    /// fails.
    pub fn run_pass(&mut self, mode: BakeMode, host: &mut dyn BakeHost) -> Result<()> {
        self.current_pass += 1;
        let mut op = BakeOperation::new(mode, self.scene, self.settings);
        log::info!(
            "pass {}/{}: {} ({} channel(s))",
            self.current_pass,
            self.total_passes,
            mode.name(),
            op.requested_channels.len()
        );
        if self.current_pass == 1 {
            restore::activate_reserved_uv(self.scene, &op.all_objects());
        }
        self.init_render(&op);

        let result = self.bake_tiles(&mut op, host);
        self.restore_materials();
        result?;
        self.finish_pass(&op)
    }

    fn init_render(&mut self, op: &BakeOperation) {
        let s = self.settings;
        let render = &mut self.scene.render;
        render.engine = RenderEngine::Cycles;
        render.tile_size = match render.device {
            RenderDevice::Cpu => CPU_TILE_SIZE,
            RenderDevice::Gpu => s.resolution[0]
                .max(s.resolution[1])
                .min(s.gpu_tile_limit)
                .max(1),
        };
        render.samples = if op.mode == BakeMode::CyclesNative {
            s.native_samples
        } else {
            s.fast_samples
        };
        render.bake.use_clear = false;
        render.bake.margin = s.margin;
        render.bake.use_selected_to_active = op.mode == BakeMode::PbrSelectedToActive;
        render.bake.cage_extrusion = s.cage_extrusion;
        render.bake.max_ray_distance = s.max_ray_distance;
    }

    fn restore_materials(&mut self) {
        restore_original_materials(self.scene);
        restore::remove_working_copies(self.scene);
    }

    fn bake_tiles(&mut self, op: &mut BakeOperation, host: &mut dyn BakeHost) -> Result<()> {
        let objects = op.all_objects();
        if self.settings.uses_udims() {
            self.tile_uvs = Some(restore::capture_uv_coords(self.scene, &objects));
        }
        for tile in udim::tiles(self.settings.tile_count()) {
            op.udim_tile_counter = tile;
            let [u, v] = udim::tile_offset(tile);
            restore::shift_uvs(self.scene, &objects, [-u, -v]);
            let result = self.bake_channels(op, host);
            if let Some(saved) = &self.tile_uvs {
                restore::restore_uv_coords(self.scene, saved);
            }
            result?;
        }
        self.tile_uvs = None;
        Ok(())
    }

    fn bake_channels(&mut self, op: &BakeOperation, host: &mut dyn BakeHost) -> Result<()> {
        let units = plan_units(self.scene, self.settings, op);
        for &channel in &op.requested_channels {
            for unit in &units {
                self.bake_unit(op, channel, unit, host)?;
                let pct = self.progress.advance();
                log::debug!("progress {pct}%");
            }
        }
        Ok(())
    }

    fn image_base_name(&self, prefix: &str, channel: Channel) -> String {
        let alias = channel.alias(Presentation::Standard);
        if self.settings.batch_name.is_empty() {
            format!("{prefix}_{alias}")
        } else {
            format!("{}_{prefix}_{alias}", self.settings.batch_name)
        }
    }

    fn create_images(
        &mut self,
        op: &BakeOperation,
        channel: Channel,
        unit: &BakeUnit,
        tile: Option<u32>,
    ) -> Result<Vec<String>> {
        let [w, h] = self.settings.resolution;
        let color_space = if channel.is_color_data() {
            ColorSpace::Srgb
        } else {
            ColorSpace::NonColor
        };
        let depth = output_depth(
            self.settings.export.format,
            channel == Channel::Normal,
            &self.settings.export,
        );
        let mut names = Vec::with_capacity(unit.targets.len());
        for t in &unit.targets {
            let base = self.image_base_name(&t.prefix, channel);
            let name = match tile {
                Some(tile) => udim::tile_image_name(&base, tile),
                None => base,
            };
            let tags = ImageTags {
                object: t.object.clone(),
                batch: self.settings.batch_name.clone(),
                mode: op.mode,
                channel,
                presentation: Presentation::Standard,
                merged: t.merged.clone(),
                udim: self.settings.uses_udims(),
                material: t.material.clone(),
                pack: None,
            };
            let mut image = BakedImage::new(&name, tags, PixelBuffer::new(w, h, color_space, depth));
            image.tile = tile;
            self.images
                .insert(image)
                .with_context(|| format!("creating bake target {name}"))?;
            names.push(name);
        }
        Ok(names)
    }

    /// Swap every slot of `object` for a prepared duplicate, reusing
    /// duplicates already made for the same material in this unit.
    fn repoint_slots(
        &mut self,
        object: &str,
        done: &mut BTreeMap<String, String>,
        mut prepare: impl FnMut(&mut Scene, &str) -> Result<String, TransformError>,
    ) -> Result<Result<(), TransformError>> {
        let slots = self.scene.find_object(object)?.material_slots.clone();
        for (i, slot) in slots.iter().enumerate() {
            let Some(material) = slot else {
                continue;
            };
            let dup = match done.get(material) {
                Some(d) => d.clone(),
                None => match prepare(self.scene, material) {
                    Ok(d) => {
                        done.insert(material.clone(), d.clone());
                        d
                    }
                    Err(e) => return Ok(Err(e)),
                },
            };
            self.scene.find_object_mut(object)?.material_slots[i] = Some(dup);
        }
        Ok(Ok(()))
    }

    fn prepare_materials(
        &mut self,
        channel: Channel,
        unit: &BakeUnit,
        names: &[String],
    ) -> Result<Result<Prepared, TransformError>> {
        let selected_to_active = !unit.sources.is_empty();
        let image_for = |material: &str| names[unit.target_index(material)].clone();

        let mut done = BTreeMap::new();
        for obj in &unit.receivers {
            let r = self.repoint_slots(obj, &mut done, |scene, material| {
                let image = image_for(material);
                if selected_to_active {
                    prepare_bake_target(scene, material, &image)
                } else {
                    prepare_for_channel(scene, material, channel, &image).map(|p| p.name)
                }
            })?;
            if let Err(e) = r {
                return Ok(Err(e));
            }
        }

        // sources are rewired but never written to
        let mut done = BTreeMap::new();
        for obj in &unit.sources {
            let r = self.repoint_slots(obj, &mut done, |scene, material| {
                prepare_for_channel(scene, material, channel, &names[0]).map(|p| p.name)
            })?;
            if let Err(e) = r {
                return Ok(Err(e));
            }
        }
        Ok(Ok((unit.receivers.clone(), unit.sources.clone())))
    }

    fn prepare_specials(
        &mut self,
        op: &BakeOperation,
        channel: Channel,
        unit: &BakeUnit,
        names: &[String],
    ) -> Result<Prepared> {
        let mut objects = Vec::with_capacity(unit.receivers.len());
        for obj in &unit.receivers {
            let copy = restore::create_working_copy(self.scene, obj)?;
            let mut slots = self.scene.find_object(obj)?.material_slots.clone();
            if slots.is_empty() {
                slots.push(None);
            }
            let mut new_slots = Vec::with_capacity(slots.len());
            for (i, slot) in slots.iter().enumerate() {
                let key = slot.as_deref().unwrap_or_default();
                let image = &names[unit.target_index(key)];
                let color = (channel == Channel::MaterialId)
                    .then(|| op.material_colors.get(key).copied().unwrap_or([0.0; 3]));
                let material = special_material(channel, &self.settings.specials_settings, color, image)
                    .with_context(|| format!("building {channel} material for '{obj}'"))?;
                let name = self.scene.unique_material_name(&format!("SB_{channel}_{copy}_{i}"));
                self.scene.materials.insert(name.clone(), material);
                new_slots.push(Some(name));
            }
            self.scene.find_object_mut(&copy)?.material_slots = new_slots;
            objects.push(copy);
        }
        Ok((objects, Vec::new()))
    }

    fn bake_unit(
        &mut self,
        op: &BakeOperation,
        channel: Channel,
        unit: &BakeUnit,
        host: &mut dyn BakeHost,
    ) -> Result<()> {
        let tile = self.settings.uses_udims().then_some(op.udim_tile_counter);
        let names = self.create_images(op, channel, unit, tile)?;

        let prepared = if is_synthesized(channel) {
            self.prepare_specials(op, channel, unit, &names).map(Ok)
        } else {
            self.prepare_materials(channel, unit, &names)
        };
        let (objects, sources) = match prepared {
            Ok(Ok(p)) => p,
            Ok(Err(e)) => {
                log::warn!("skipping {channel} for {}: {e}", unit.label());
                self.skipped.push(format!("{} / {channel}: {e}", unit.label()));
                self.restore_materials();
                for n in &names {
                    self.images.remove(n);
                }
                return Ok(());
            }
            Err(e) => {
                self.restore_materials();
                return Err(e);
            }
        };

        let saved = self.scene.render.clone();
        self.scene.render.bake.bake_type = channel.bake_pass();
        if channel == Channel::Lightmap {
            let toggles = &mut self.scene.render.bake;
            toggles.use_pass_direct = true;
            toggles.use_pass_indirect = true;
            toggles.use_pass_color = true;
            self.scene.render.samples = self.render_snapshot.samples;
        }
        let request = BakeRequest::from_scene(self.scene, objects, sources);
        let result = host.bake(self.scene, &request, &mut self.images);
        if channel == Channel::Lightmap {
            self.scene.render.bake = saved.bake;
            self.scene.render.samples = saved.samples;
        }
        self.restore_materials();

        result.with_context(|| format!("baking {channel} for {}", unit.label()))?;
        log::info!("baked {}", names.join(", "));
        Ok(())
    }

    /// Post-bake transform that changes how a channel is presented.
    fn presentation_transform(&self, channel: Channel) -> Option<PixelTransform> {
        match channel {
            Channel::Roughness if self.settings.roughness_as_glossy => Some(PixelTransform::RoughnessToGlossy),
            Channel::Normal if self.settings.normal_convention == NormalConvention::DirectX => {
                Some(PixelTransform::NormalToDirectX)
            }
            _ => None,
        }
    }

    fn finish_pass(&mut self, op: &BakeOperation) -> Result<()> {
        let mode = op.mode;
        let names: Vec<String> = self
            .images
            .filter(move |i| i.tags.mode == mode && i.tags.pack.is_none() && !i.is_udim_sequence())
            .map(|i| i.name.clone())
            .collect();
        let target = self.settings.delivery_resolution();
        let export = &self.settings.export;
        let specials = &self.settings.specials_settings;
        let mut staged = Vec::new();

        for mut name in names {
            let channel = self
                .images
                .get(&name)
                .map(|i| i.tags.channel)
                .ok_or_else(|| anyhow!("image vanished: {name}"))?;
            if let Some(t) = self.presentation_transform(channel) {
                let out = self
                    .images
                    .get(&name)
                    .map(|i| post_process_1to1(i, t))
                    .ok_or_else(|| anyhow!("image vanished: {name}"))??;
                let renamed = out.name.clone();
                self.images.replace(&name, out)?;
                name = renamed;
            }

            let image = self
                .images
                .get_mut(&name)
                .ok_or_else(|| anyhow!("image vanished: {name}"))?;
            let invert = match channel {
                Channel::AmbientOcclusion => specials.invert_ao,
                Channel::Thickness => specials.invert_thickness,
                _ => false,
            };
            if invert {
                if let Some(b) = image.buffer_mut() {
                    apply_transform(b, PixelTransform::INVERT_RGB);
                }
            }
            scale_image(image, target)?;

            if let Some(root) = &self.export_root {
                export_image(image, root, export, export.format)?;
            } else if image.tile.is_some() {
                let path = self
                    .textures_dir
                    .join(format!("{name}.{}", export.format.extension()));
                write_buffer(image.require_buffer()?, &path, export.format)?;
                image.file_path = Some(path.clone());
                staged.push(path);
            }
        }

        if self.settings.uses_udims() {
            let bases: BTreeSet<String> = self
                .images
                .filter(move |i| i.tags.mode == mode && i.tile.is_some())
                .filter_map(|i| i.name.rsplit_once('.').map(|(base, _)| base.to_string()))
                .collect();
            for base in bases {
                udim::assemble_udim(&mut self.images, &base)?;
                if self.export_root.is_none() {
                    if let Some(image) = self.images.get_mut(&base) {
                        image.file_path = None;
                    }
                }
            }
            for path in staged {
                if let Err(e) = std::fs::remove_file(&path) {
                    log::debug!("could not remove staged tile {}: {e}", path.display());
                }
            }
        }
        Ok(())
    }

    // ── Delivery ─────────────────────────────────────────────────────────

    fn pack_all(&mut self) -> Result<()> {
        if self.settings.channel_packs.is_empty() {
            return Ok(());
        }
        let mut groups: Vec<(String, Option<String>)> = Vec::new();
        for image in self.images.filter(|i| i.tags.pack.is_none() && i.tile.is_none()) {
            let key = (image.tags.group().to_string(), image.tags.material.clone());
            if !groups.contains(&key) {
                groups.push(key);
            }
        }

        let export = &self.settings.export;
        for request in &self.settings.channel_packs {
            let depth = output_depth(request.format, false, export);
            for (group, material) in &groups {
                let mut slots: [Option<PackSource<'_>>; 4] = [None; 4];
                let mut tags: Option<ImageTags> = None;
                let mut missing = None;
                for (i, channel) in request.assignments().into_iter().enumerate() {
                    let Some(channel) = channel else {
                        continue;
                    };
                    let found = self
                        .images
                        .find_channel(group, channel, material.as_deref())
                        .and_then(|img| img.buffer().map(|b| (img, b)));
                    match found {
                        Some((img, buffer)) => {
                            tags.get_or_insert_with(|| img.tags.clone());
                            slots[i] = Some(PackSource { channel, buffer });
                        }
                        None => {
                            missing = Some(channel);
                            break;
                        }
                    }
                }
                if let Some(channel) = missing {
                    log::warn!(
                        "channel pack '{}' skipped for '{group}': no {channel} bake",
                        request.name
                    );
                    continue;
                }
                let Some(mut tags) = tags else {
                    continue;
                };
                let buffer = pack_channels(slots, request.format, depth)
                    .with_context(|| format!("packing '{}' for '{group}'", request.name))?;

                tags.pack = Some(request.name.clone());
                tags.presentation = Presentation::Standard;
                let prefix = match material {
                    Some(m) => format!("{group}_{m}"),
                    None => group.clone(),
                };
                let name = if self.settings.batch_name.is_empty() {
                    format!("{prefix}_{}", request.name)
                } else {
                    format!("{}_{prefix}_{}", self.settings.batch_name, request.name)
                };
                let mut image = BakedImage::new(name, tags, buffer);
                if let Some(root) = &self.export_root {
                    export_image(&mut image, root, export, request.format)?;
                }
                log::info!("packed {}", image.name);
                self.images.insert(image)?;
            }
        }
        Ok(())
    }

    fn copy_requests(&self) -> Vec<CopyRequest> {
        let s = self.settings;
        let group_of = |object: &str| {
            if s.merged_bake {
                s.merged_bake_name.clone()
            } else {
                object.to_string()
            }
        };
        match (&s.target_object, s.selected_to_active) {
            (Some(target), true) => vec![CopyRequest {
                source: target.clone(),
                group: target.clone(),
            }],
            _ => self
                .source_objects
                .iter()
                .map(|o| CopyRequest {
                    source: o.clone(),
                    group: group_of(o),
                })
                .collect(),
        }
    }

    fn deliver(&mut self) -> Result<(Vec<String>, Vec<PathBuf>)> {
        if !self.settings.uses_udims() {
            self.pack_all()?;
        }

        let mut copies = Vec::new();
        if self.settings.copy_objects.enabled {
            let requests = self.copy_requests();
            copies = prepare_export_copies(
                self.scene,
                &requests,
                &self.images,
                &self.settings.copy_objects,
                self.settings.texture_per_material,
            )?;
        }

        let mut meshes = Vec::new();
        let export = &self.settings.export;
        if let Some(root) = &self.export_root {
            if export.export_mesh && !copies.is_empty() {
                if export.mesh_per_object {
                    for c in &copies {
                        meshes.push(write_obj(self.scene, std::slice::from_ref(c), root, c)?);
                    }
                } else {
                    let merged = if self.settings.merged_bake {
                        self.settings.merged_bake_name.as_str()
                    } else {
                        ""
                    };
                    let stem = [self.settings.batch_name.as_str(), merged]
                        .into_iter()
                        .find(|s| !s.is_empty())
                        .unwrap_or("BakedObjects");
                    meshes.push(write_obj(self.scene, &copies, root, stem)?);
                }
            }
        }
        Ok((copies, meshes))
    }

    /// Packing, export copies and mesh export, then FINALIZE.
    pub fn finish(mut self) -> Result<BakeOutcome> {
        let delivered = self.deliver();
        self.finalize(delivered.is_ok());
        let (export_copies, mesh_files) = delivered?;
        self.progress.complete();
        Ok(BakeOutcome {
            images: std::mem::take(&mut self.images),
            export_root: self.export_root.clone(),
            export_copies,
            mesh_files,
            skipped: std::mem::take(&mut self.skipped),
            repaired: Vec::new(),
        })
    }

    /// Restore everything captured at the start. Runs once; later calls do
    /// nothing. Cleanup failures are logged and dropped.
    fn finalize(&mut self, success: bool) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        self.restore_materials();
        if let Some(saved) = self.tile_uvs.take() {
            restore::restore_uv_coords(self.scene, &saved);
        }
        self.scene.render = self.render_snapshot.clone();
        if self.settings.restore_active_uv {
            restore::restore_active_uvs(self.scene, &self.original_uv_active);
        }
        self.scene.selection = self.selection_snapshot.clone();
        self.scene.active_object = self.active_snapshot.clone();
        if success && self.settings.hide_source_objects {
            restore::hide_objects(self.scene, &self.source_objects);
        }

        if !self.textures_dir_preexisted && self.textures_dir.is_dir() {
            let empty = std::fs::read_dir(&self.textures_dir)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if empty {
                if let Err(e) = std::fs::remove_dir(&self.textures_dir) {
                    log::debug!("could not remove {}: {e}", self.textures_dir.display());
                }
            }
        }
        log::info!("bake session finalized");
    }
}

impl Drop for BakeSession<'_> {
    fn drop(&mut self) {
        if !self.finalized {
            log::warn!("bake session ended early, restoring scene");
            self.finalize(false);
        }
    }
}
