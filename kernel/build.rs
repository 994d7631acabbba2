use std::path::Path;

fn main() {
	println!("cargo:rerun-if-changed=linker.ld");

	// Host builds (`cargo check` on the workspace) link normally.
	if std::env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("none") {
		return;
	}

	let script = Path::new(env!("CARGO_MANIFEST_DIR")).join("linker.ld");
	println!("cargo:rustc-link-arg-bins=-T{}", script.display());
}
