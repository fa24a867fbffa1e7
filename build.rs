use std::env;
use std::path::PathBuf;
use std::process::Command;

fn main() {
    if env::var("CARGO_FEATURE_CUDA").is_err() {
        println!("cargo:warning=CUDA feature not enabled, skipping kernel compilation.");
        return;
    }

    println!("cargo:rerun-if-env-changed=CUDA_PATH");
    println!("cargo:rerun-if-env-changed=SOFTPOOL_NVCC_ARCH");

    // Find nvcc - `which` first, then CUDA_PATH, then the usual install prefixes
    let nvcc_path = match which::which("nvcc") {
        Ok(path) => path,
        Err(_) => {
            if let Ok(cuda_path) = env::var("CUDA_PATH") {
                PathBuf::from(cuda_path).join("bin").join("nvcc")
            } else {
                ["/usr/local/cuda/bin/nvcc", "/opt/cuda/bin/nvcc"]
                    .iter()
                    .map(PathBuf::from)
                    .find(|p| p.exists())
                    .expect("nvcc not found. Ensure CUDA Toolkit is installed and nvcc is in PATH, or set CUDA_PATH.")
            }
        }
    };
    println!("cargo:warning=Using nvcc found at: {:?}", nvcc_path);

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    let kernels_to_compile = [("src/backend/cuda/kernels/softpool.cu", "softpool.ptx")];

    for (src_path, ptx_filename) in kernels_to_compile {
        let ptx_path = out_dir.join(ptx_filename);
        println!(
            "cargo:warning=Compiling {} to {}",
            src_path,
            ptx_path.display()
        );

        let mut nvcc = Command::new(&nvcc_path);
        // No --use_fast_math: the clamps compare against exact FLT_MIN/FLT_MAX.
        nvcc.arg("--ptx").arg("-O3");
        if let Ok(arch) = env::var("SOFTPOOL_NVCC_ARCH") {
            nvcc.arg(format!("-arch={}", arch));
        }
        let status = nvcc
            .arg("-o")
            .arg(&ptx_path)
            .arg(src_path)
            .status()
            .unwrap_or_else(|e| panic!("Failed to execute nvcc for {}: {}", src_path, e));

        if !status.success() {
            panic!("nvcc failed to compile {}", src_path);
        }
        println!("cargo:rerun-if-changed={}", src_path);
    }
}
