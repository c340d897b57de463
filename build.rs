// build.rs

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // The headless backend needs no native libraries. Only the GLX backend
    // links against Xlib and libGL.
    if std::env::var_os("CARGO_FEATURE_GLX").is_none() {
        return;
    }

    // Try pkg-config first; if it can't find everything, fall back to
    // linking by name from the standard library paths.
    let libraries = ["x11", "gl"];

    let mut pkg_config_success = true;
    for lib in &libraries {
        if pkg_config::probe_library(lib).is_err() {
            eprintln!(
                "pkg-config failed for library '{}'. Falling back to manual linking.",
                lib
            );
            pkg_config_success = false;
            break;
        }
    }

    if !pkg_config_success {
        println!("cargo:rustc-link-lib=X11");
        println!("cargo:rustc-link-lib=GL");
        println!("cargo:rustc-link-search=/usr/lib");
        eprintln!("Manual linking flags applied. Ensure X11 and libGL development libraries are installed.");
    } else {
        eprintln!("pkg-config successfully found libraries. Linking configured automatically.");
    }
}
