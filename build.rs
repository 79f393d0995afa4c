use std::{env, path::PathBuf};

const WATCHED_VARIABLES: [&str; 5] = [
    "FFMPEG_DIR",
    "PKG_CONFIG_PATH",
    "VCPKG_ROOT",
    "VCPKGRS_DYNAMIC",
    "VCPKGRS_TRIPLET",
];

/// Where a vcpkg install of FFmpeg would live, if `VCPKG_ROOT` is set.
fn vcpkg_ffmpeg_dir() -> Option<PathBuf> {
    let root = env::var_os("VCPKG_ROOT")?;
    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    Some(PathBuf::from(root).join("installed").join(triplet))
}

fn main() {
    for variable in WATCHED_VARIABLES {
        println!("cargo:rerun-if-env-changed={variable}");
    }

    // ffmpeg-sys-next finds FFmpeg through pkg-config everywhere except
    // Windows, where it needs FFMPEG_DIR.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("windows") {
        return;
    }
    if env::var_os("FFMPEG_DIR").is_some() {
        return;
    }

    match vcpkg_ffmpeg_dir() {
        Some(dir) if dir.exists() => {
            println!(
                "cargo:warning=frameseek: found vcpkg FFmpeg at {0}; set FFMPEG_DIR={0} to use it explicitly.",
                dir.display(),
            );
            if env::var_os("VCPKGRS_DYNAMIC").is_none() {
                println!("cargo:warning=frameseek: set VCPKGRS_DYNAMIC=1 for dynamic vcpkg FFmpeg builds.");
            }
        }
        Some(dir) => println!(
            "cargo:warning=frameseek: VCPKG_ROOT is set but {} holds no FFmpeg install.",
            dir.display(),
        ),
        None => println!(
            "cargo:warning=frameseek: FFMPEG_DIR is not set; install FFmpeg development files (e.g. via vcpkg) and point FFMPEG_DIR at them."
        ),
    }
}
