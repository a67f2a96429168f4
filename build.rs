fn main() {
    // vergen emits defaults when git metadata is unavailable (container builds).
    if let Err(err) = vergen::EmitBuilder::builder()
        .build_timestamp()
        .git_sha(true)
        .emit()
    {
        println!("cargo:warning=vergen: {err}");
        println!("cargo:rustc-env=VERGEN_GIT_SHA=unknown");
        println!("cargo:rustc-env=VERGEN_BUILD_TIMESTAMP=unknown");
    }
}
