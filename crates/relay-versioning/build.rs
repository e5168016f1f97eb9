//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "build"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Build metadata emission for version reporting."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Archive deployments have no .git directory; vergen falls back to
    // placeholder values instead of failing the build.
    EmitBuilder::builder()
        .all_build()
        .all_cargo()
        .all_git()
        .emit()?;

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
