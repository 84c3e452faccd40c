//! Example: Load and inspect a USD stage.
//!
//! Run with: cargo run --example inspect_stage -- scene.usda

use std::env;

use usd2gltf_core::mesh::Mesh;
use usd2gltf_core::shade::{bound_material, read_material};
use usd2gltf_core::usd::{load_stage, Xformable};

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        println!("Usage: inspect_stage <path-to-usd-file>");
        println!("\nExamples:");
        println!("  cargo run --example inspect_stage -- scene.usda");
        println!("  cargo run --example inspect_stage -- model.usdz");
        return;
    }

    let path = &args[1];
    println!("Loading stage: {}", path);

    let stage = match load_stage(path) {
        Ok(stage) => stage,
        Err(e) => {
            eprintln!("Error loading stage: {}", e);
            return;
        }
    };

    let meta = &stage.metadata;
    println!("\n=== Stage ===");
    println!("Default prim: {}", meta.default_prim.as_deref().unwrap_or("-"));
    println!("Up axis: {}", meta.up_axis);
    println!("Meters per unit: {}", meta.meters_per_unit());
    println!("Time codes per second: {}", meta.time_codes_per_second);
    println!("Prims: {}", stage.prim_count());
    println!("Packaged assets: {}", stage.assets.len());

    println!("\n--- Prims ---");
    for prim in stage.traverse() {
        let depth = prim.path().prefixes().len().saturating_sub(1);
        let type_name = if prim.type_name.is_empty() { "-" } else { prim.type_name.as_str() };
        let animated = if Xformable::new(prim).is_animated() { " (animated)" } else { "" };
        println!("{:indent$}{} [{}]{}", "", prim.name(), type_name, animated, indent = depth * 2);

        if prim.is_a("Mesh") {
            match Mesh::from_prim(prim) {
                Ok(Some(mesh)) => {
                    println!(
                        "{:indent$}  {} vertices, {} triangles",
                        "",
                        mesh.vertex_count(),
                        mesh.triangle_count(),
                        indent = depth * 2
                    );
                    if mesh.has_uvs() {
                        println!("{:indent$}  {} uv sets", "", mesh.uv_sets.len(), indent = depth * 2);
                    }
                }
                Ok(None) => println!("{:indent$}  (empty)", "", indent = depth * 2),
                Err(e) => println!("{:indent$}  error: {}", "", e, indent = depth * 2),
            }
            if let Some(material) = bound_material(&stage, prim) {
                println!("{:indent$}  material: {}", "", material.path(), indent = depth * 2);
            }
        }
    }

    println!("\n--- Materials ---");
    for prim in stage.traverse().into_iter().filter(|p| p.is_a("Material")) {
        let material = read_material(&stage, prim);
        match &material.surface {
            Some(surface) => {
                println!("  {} -> {}", material.path, surface.path);
                if let Some(texture) = surface.diffuse_color.texture() {
                    println!(
                        "       diffuse texture: {} (st set {})",
                        texture.texture.file, texture.texture.uv_set
                    );
                }
            }
            None => println!("  {} (no preview surface)", material.path),
        }
    }
}
