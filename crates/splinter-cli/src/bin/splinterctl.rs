//! Non-interactive, single-command entry point. `argv[0]`'s basename
//! decides the mode (see [`splinter_cli::select_mode`]), so this wrapper
//! runs fine even if the binary is invoked through a renamed copy or
//! symlink.

fn main() {
    let argv0 = std::env::args().next().unwrap_or_default();
    let mode = splinter_cli::select_mode(&argv0);
    std::process::exit(splinter_cli::run(mode));
}
