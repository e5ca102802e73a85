//! Reference bake primitive: UV-space rasterisation on the CPU.

use std::collections::{BTreeMap, HashMap};

use glam::Vec3;

use crate::{
    channel::{BakePass, NativePass},
    error::HostError,
    graph::luminance,
    imaging::{ColorSpace, ImageStore, PixelBuffer, export::read_buffer},
    scene::{BakeToggles, Scene},
};

use super::{
    BakeHost, BakeRequest,
    eval::{Evaluator, ShadePoint},
    geometry::ObjectGeometry,
};

/// Upper bound on hemisphere rays per sample for native passes.
const MAX_NATIVE_RAYS: u32 = 256;

#[derive(Default)]
pub struct CpuBakeHost {
    textures: HashMap<String, PixelBuffer>,
    /// Number of bake calls served, for diagnostics.
    pub calls: usize,
}

struct Job {
    receiver: usize,
    triangle: usize,
}

impl CpuBakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn load_textures(&mut self, scene: &Scene) -> Result<(), HostError> {
        for (name, image) in &scene.images {
            if self.textures.contains_key(name) {
                continue;
            }
            let cs = if image.non_color {
                ColorSpace::NonColor
            } else {
                ColorSpace::Srgb
            };
            let buffer = read_buffer(&image.path, cs)
                .map_err(|e| HostError::Failed(format!("texture '{name}': {e:#}")))?;
            self.textures.insert(name.clone(), buffer);
        }
        Ok(())
    }
}

/// Target image of the material in slot `slot` of `object`.
fn target_image(scene: &Scene, geometry: &ObjectGeometry<'_>, slot: usize) -> Result<String, HostError> {
    let material_name = geometry
        .object
        .material_slots
        .get(slot)
        .cloned()
        .flatten()
        .unwrap_or_default();
    let no_image = || HostError::NoActiveImage {
        material: material_name.clone(),
    };
    let material = scene.materials.get(&material_name).ok_or_else(no_image)?;
    let node = material
        .graph
        .active_node
        .and_then(|id| material.graph.node(id))
        .ok_or_else(no_image)?;
    node.param_str("image").map(str::to_string).ok_or_else(no_image)
}

fn material_graph<'s>(scene: &'s Scene, geometry: &ObjectGeometry<'_>, slot: usize) -> Option<&'s crate::graph::NodeGraph> {
    let name = geometry.object.material_slots.get(slot)?.as_ref()?;
    scene.materials.get(name).map(|m| &m.graph)
}

impl BakeHost for CpuBakeHost {
    fn bake(&mut self, scene: &Scene, request: &BakeRequest, images: &mut ImageStore) -> Result<(), HostError> {
        self.calls += 1;
        self.load_textures(scene)?;

        let receivers: Vec<ObjectGeometry<'_>> = request
            .objects
            .iter()
            .map(|n| {
                scene
                    .object(n)
                    .and_then(ObjectGeometry::new)
                    .ok_or_else(|| HostError::Failed(format!("object '{n}' is not a mesh in the scene")))
            })
            .collect::<Result<_, _>>()?;
        let sources: Vec<ObjectGeometry<'_>> = request
            .sources
            .iter()
            .filter_map(|n| scene.object(n).and_then(ObjectGeometry::new))
            .collect();

        // group triangles by the image they write into
        let mut jobs: BTreeMap<String, Vec<Job>> = BTreeMap::new();
        for (r, geo) in receivers.iter().enumerate() {
            if geo.mesh.active_uv_map().is_none() {
                return Err(HostError::NoUvMap {
                    object: geo.name.to_string(),
                });
            }
            let mut slot_images: HashMap<usize, String> = HashMap::new();
            for (t, tri) in geo.mesh.triangles.iter().enumerate() {
                let image = match slot_images.get(&tri.material_index) {
                    Some(i) => i.clone(),
                    None => {
                        let i = target_image(scene, geo, tri.material_index)?;
                        slot_images.insert(tri.material_index, i.clone());
                        i
                    }
                };
                jobs.entry(image).or_default().push(Job { receiver: r, triangle: t });
            }
        }

        for (image_name, list) in jobs {
            let material = || {
                list.first()
                    .and_then(|j| receivers[j.receiver].object.material_slots.first().cloned().flatten())
                    .unwrap_or_default()
            };
            let buffer = images
                .get_mut(&image_name)
                .and_then(|i| i.buffer_mut())
                .ok_or_else(|| HostError::MissingImage {
                    material: material(),
                    image: image_name.clone(),
                })?;
            let [w, h] = buffer.dimensions();
            let mut covered = vec![false; w as usize * h as usize];
            for job in &list {
                let geo = &receivers[job.receiver];
                rasterize(geo, job.triangle, w, h, |x, y, bary| {
                    let value = shade(scene, request, geo, job.triangle, bary, &sources, &self.textures);
                    if let Some(px) = value {
                        buffer.set_pixel(x, y, px);
                        covered[(y * w + x) as usize] = true;
                    }
                });
            }
            dilate(buffer, &mut covered, request.margin);
            log::debug!("baked {} triangle(s) into {image_name}", list.len());
        }
        Ok(())
    }
}

/// Visit the pixel centers of one triangle in UV space.
fn rasterize(geo: &ObjectGeometry<'_>, triangle: usize, w: u32, h: u32, mut f: impl FnMut(u32, u32, [f32; 3])) {
    let (Some(uv_map), Some(v)) = (geo.mesh.active_uv_map(), geo.triangle_vertices(triangle)) else {
        return;
    };
    let Some(uvs) = v
        .iter()
        .map(|&i| uv_map.coords.get(i).copied())
        .collect::<Option<Vec<[f32; 2]>>>()
    else {
        return;
    };
    // image space, y down
    let p: Vec<(f32, f32)> = uvs
        .iter()
        .map(|uv| (uv[0] * w as f32, (1.0 - uv[1]) * h as f32))
        .collect();
    let area = (p[1].0 - p[0].0) * (p[2].1 - p[0].1) - (p[2].0 - p[0].0) * (p[1].1 - p[0].1);
    if area.abs() < 1e-12 {
        return;
    }
    let min_x = p.iter().map(|q| q.0).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let max_x = p.iter().map(|q| q.0).fold(f32::NEG_INFINITY, f32::max).ceil().min(w as f32) as u32;
    let min_y = p.iter().map(|q| q.1).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let max_y = p.iter().map(|q| q.1).fold(f32::NEG_INFINITY, f32::max).ceil().min(h as f32) as u32;
    const EDGE: f32 = -1e-5;
    for y in min_y..max_y {
        for x in min_x..max_x {
            let (cx, cy) = (x as f32 + 0.5, y as f32 + 0.5);
            let w0 = ((p[1].0 - cx) * (p[2].1 - cy) - (p[2].0 - cx) * (p[1].1 - cy)) / area;
            let w1 = ((p[2].0 - cx) * (p[0].1 - cy) - (p[0].0 - cx) * (p[2].1 - cy)) / area;
            let w2 = 1.0 - w0 - w1;
            if w0 >= EDGE && w1 >= EDGE && w2 >= EDGE {
                f(x, y, [w0, w1, w2]);
            }
        }
    }
}

fn uv_at(geo: &ObjectGeometry<'_>, triangle: usize, bary: [f32; 3]) -> [f32; 2] {
    let (Some(map), Some(v)) = (geo.mesh.active_uv_map(), geo.triangle_vertices(triangle)) else {
        return [0.0, 0.0];
    };
    let mut uv = [0.0, 0.0];
    for (i, w) in v.iter().zip(bary) {
        let c = map.coords.get(*i).copied().unwrap_or_default();
        uv[0] += c[0] * w;
        uv[1] += c[1] * w;
    }
    uv
}

fn shade(
    scene: &Scene,
    request: &BakeRequest,
    receiver: &ObjectGeometry<'_>,
    triangle: usize,
    bary: [f32; 3],
    sources: &[ObjectGeometry<'_>],
    textures: &HashMap<String, PixelBuffer>,
) -> Option<[f32; 4]> {
    let position = receiver.interpolate_position(triangle, bary);
    let normal = receiver.interpolate_normal(triangle, bary);

    if request.selected_to_active {
        let origin = position + normal * request.cage_extrusion;
        let limit = if request.max_ray_distance > 0.0 {
            request.cage_extrusion + request.max_ray_distance
        } else {
            f32::INFINITY
        };
        let (geo, hit) = sources
            .iter()
            .filter_map(|g| g.cast(origin, -normal, limit).map(|h| (g, h)))
            .min_by(|a, b| a.1.distance.total_cmp(&b.1.distance))?;
        let slot = geo.mesh.triangles.get(hit.triangle)?.material_index;
        let graph = material_graph(scene, geo, slot)?;
        let pt = ShadePoint {
            geometry: geo,
            triangle: hit.triangle,
            bary: hit.bary,
            uv: uv_at(geo, hit.triangle, hit.bary),
            position: geo.interpolate_position(hit.triangle, hit.bary),
            normal: geo.interpolate_normal(hit.triangle, hit.bary),
        };
        let mut ev = Evaluator::new(graph, textures, scene.world_color);
        return Some(pass_value(request.pass, &mut ev, &pt, &scene.render.bake, scene.render.samples));
    }

    let slot = receiver.mesh.triangles.get(triangle)?.material_index;
    let graph = material_graph(scene, receiver, slot)?;
    let pt = ShadePoint {
        geometry: receiver,
        triangle,
        bary,
        uv: uv_at(receiver, triangle, bary),
        position,
        normal,
    };
    let mut ev = Evaluator::new(graph, textures, scene.world_color);
    Some(pass_value(request.pass, &mut ev, &pt, &scene.render.bake, scene.render.samples))
}

fn pass_value(pass: BakePass, ev: &mut Evaluator<'_>, pt: &ShadePoint<'_>, toggles: &BakeToggles, samples: u32) -> [f32; 4] {
    let gray = |v: f32| [v, v, v, 1.0];
    let rays = samples.clamp(1, MAX_NATIVE_RAYS);
    let base_color = |ev: &mut Evaluator<'_>| {
        ev.principled_input("Base Color", pt)
            .map_or([1.0; 4], |v| v.as_rgba())
    };
    let occlusion = || pt.geometry.ambient_occlusion(pt.position, pt.normal, 1.0, rays);

    match pass {
        BakePass::Emit => ev.emitted(pt),
        BakePass::Normal => ev.tangent_normal(pt),
        BakePass::Native(native) => match native {
            NativePass::Combined | NativePass::Diffuse => {
                let color = if toggles.use_pass_color { base_color(&mut *ev) } else { [1.0; 4] };
                let mut light = 0.0;
                if toggles.use_pass_direct {
                    light += occlusion();
                }
                if toggles.use_pass_indirect {
                    light += ev.world_luminance();
                }
                let mut out = [color[0] * light, color[1] * light, color[2] * light, 1.0];
                if native == NativePass::Combined {
                    let e = ev.emitted(pt);
                    for i in 0..3 {
                        out[i] += e[i];
                    }
                }
                out
            }
            NativePass::Ao | NativePass::Shadow => gray(occlusion()),
            NativePass::Position => [pt.position.x, pt.position.y, pt.position.z, 1.0],
            NativePass::Normal => {
                let n = pt.normal * 0.5 + Vec3::splat(0.5);
                [n.x, n.y, n.z, 1.0]
            }
            NativePass::Uv => [pt.uv[0], pt.uv[1], 0.0, 1.0],
            NativePass::Roughness => gray(ev.principled_input("Roughness", pt).map_or(0.5, |v| v.as_float())),
            NativePass::Emit => ev.emitted(pt),
            NativePass::Environment => {
                let w = ev.world_color;
                [w[0], w[1], w[2], 1.0]
            }
            NativePass::Glossy => {
                let spec = ev.principled_input("Specular", pt).map_or(0.5, |v| v.as_float());
                let rough = ev.principled_input("Roughness", pt).map_or(0.5, |v| v.as_float());
                gray(spec * (1.0 - rough))
            }
            NativePass::Transmission => {
                let t = ev.principled_input("Transmission", pt).map_or(0.0, |v| v.as_float());
                let c = base_color(&mut *ev);
                [c[0] * t, c[1] * t, c[2] * t, 1.0]
            }
        },
    }
}

/// Grow covered pixels outwards by `margin` pixels, each ring taking the
/// mean of its covered neighbours.
pub fn dilate(buffer: &mut PixelBuffer, covered: &mut [bool], margin: u32) {
    let [w, h] = buffer.dimensions();
    for _ in 0..margin {
        let mut ring: Vec<(u32, u32, [f32; 4])> = Vec::new();
        for y in 0..h {
            for x in 0..w {
                if covered[(y * w + x) as usize] {
                    continue;
                }
                let mut sum = [0.0f32; 4];
                let mut n = 0;
                for (dx, dy) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1), (-1, -1), (1, 1), (-1, 1), (1, -1)] {
                    let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                    if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                        continue;
                    }
                    if covered[(ny as u32 * w + nx as u32) as usize] {
                        let px = buffer.get_pixel(nx as u32, ny as u32);
                        for i in 0..4 {
                            sum[i] += px[i];
                        }
                        n += 1;
                    }
                }
                if n > 0 {
                    ring.push((x, y, sum.map(|s| s / n as f32)));
                }
            }
        }
        if ring.is_empty() {
            return;
        }
        for (x, y, px) in ring {
            buffer.set_pixel(x, y, px);
            covered[(y * w + x) as usize] = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::BitDepth;

    #[test]
    fn dilation_fills_neighbours_only_up_to_margin() {
        let mut b = PixelBuffer::new(5, 1, ColorSpace::NonColor, BitDepth::Eight);
        b.set_pixel(0, 0, [1.0, 1.0, 1.0, 1.0]);
        let mut covered = vec![true, false, false, false, false];
        dilate(&mut b, &mut covered, 2);
        assert_eq!(b.get_pixel(1, 0), [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(b.get_pixel(2, 0), [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(b.get_pixel(3, 0), [0.0, 0.0, 0.0, 1.0]);
    }
}
