// build.rs
fn main() {
    // Generate build info consumed by the sonar_build_info gauge.
    // Outside a git checkout vergen falls back to placeholder values.
    if let Err(e) = vergen::EmitBuilder::builder()
        .all_build()
        .all_git()
        .emit()
    {
        println!("cargo:warning=Unable to generate build info: {}", e);
    }
}
