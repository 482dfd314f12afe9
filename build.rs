fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Git metadata for the `machine` system command. Falls back to defaults
    // when the crate is built outside of a git checkout.
    vergen::EmitBuilder::builder()
        .git_sha(true)
        .git_branch()
        .emit()?;

    Ok(())
}
