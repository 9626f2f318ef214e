use std::path::Path;

fn main() {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    // crates/lean-repl/ -> workspace root
    let workspace_root = Path::new(&manifest_dir).join("..").join("..");
    println!(
        "cargo:rustc-env=LEAN_REPL_WORKSPACE_ROOT={}",
        workspace_root.display()
    );
    println!("cargo:rerun-if-changed=build.rs");
}
