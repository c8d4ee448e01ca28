use clap::Parser;
use glam::Vec3;
use std::path::PathBuf;
use wavefront::Parameters;

/// シーンファイルをGPUでpath tracingしてPNGに書き出す
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// シーンファイル
    scene: PathBuf,
    /// 出力するPNG
    output: PathBuf,

    #[arg(long, default_value_t = 1200)]
    image_width: u32,
    #[arg(long, default_value_t = 1200)]
    image_height: u32,
    /// 1ピクセルあたりのサンプル数
    #[arg(long, default_value_t = 256)]
    spp: u32,
    #[arg(long, default_value_t = 4)]
    bounces: u32,
    /// ray poolに同時に置くレイの数
    #[arg(long, default_value_t = 1_048_576)]
    pool_size: u32,
    /// 使うphysical deviceのindex
    #[arg(long, default_value_t = 0)]
    device: usize,
    /// x,y,z
    #[arg(
        long,
        value_parser = parse_vec3,
        default_value = "0,1,3.1",
        allow_hyphen_values = true
    )]
    camera_origin: Vec3,
    /// x,y,z
    #[arg(
        long,
        value_parser = parse_vec3,
        default_value = "0,1,0",
        allow_hyphen_values = true
    )]
    camera_target: Vec3,
    /// 垂直方向の画角 (ラジアン)
    #[arg(long, default_value_t = 1.0)]
    camera_fov: f32,
    /// `<name>.comp.spv` を置いたディレクトリ。省略時は実行ファイルの隣の `shaders`
    #[arg(long)]
    shader_dir: Option<PathBuf>,
}
impl Args {
    fn parameters(&self) -> Parameters {
        Parameters {
            width: self.image_width,
            height: self.image_height,
            samples_per_pixel: self.spp,
            bounces: self.bounces,
            pool_ray_count: self.pool_size,
            camera_origin: self.camera_origin,
            camera_target: self.camera_target,
            camera_fov: self.camera_fov,
            device_index: self.device,
            shader_dir: self.shader_dir.clone(),
        }
    }
}

fn parse_vec3(s: &str) -> Result<Vec3, String> {
    let values = s
        .split(',')
        .map(|value| value.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| format!("`{s}` is not a list of numbers: {err}"))?;
    match values[..] {
        [x, y, z] => Ok(Vec3::new(x, y, z)),
        _ => Err(format!("expected x,y,z but got {} values", values.len())),
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let params = args.parameters();
    log::debug!("{:?}", params);
    let image = wavefront::render(&params, &args.scene)?;
    image.save_png(&args.output)?;
    Ok(())
}

fn main() {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(err) = run(&args) {
        log::error!("{:#}", err);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_parameters() {
        let args = Args::try_parse_from(["tracer", "scene.gsd", "out.png"]).unwrap();
        assert_eq!(args.scene, PathBuf::from("scene.gsd"));
        assert_eq!(args.output, PathBuf::from("out.png"));
        assert_eq!(args.parameters(), Parameters::default());
    }

    #[test]
    fn negative_camera_vectors_are_accepted() {
        let args = Args::try_parse_from([
            "tracer",
            "scene.gsd",
            "out.png",
            "--camera-origin",
            "-1,0,0",
            "--camera-target",
            "-0.5,-2,-3",
            "--spp",
            "4",
        ])
        .unwrap();
        assert_eq!(args.camera_origin, Vec3::new(-1.0, 0.0, 0.0));
        assert_eq!(args.camera_target, Vec3::new(-0.5, -2.0, -3.0));
        assert_eq!(args.parameters().samples_per_pixel, 4);
    }

    #[test]
    fn options_override_parameters() {
        let args = Args::try_parse_from([
            "tracer",
            "scene.gsd",
            "out.png",
            "--image-width",
            "640",
            "--image-height",
            "480",
            "--spp",
            "16",
            "--bounces",
            "0",
            "--pool-size",
            "4096",
            "--device",
            "1",
            "--camera-origin",
            "1, 2, 3",
            "--camera-target",
            "0,0,-1",
            "--camera-fov",
            "0.5",
            "--shader-dir",
            "build/shaders",
        ])
        .unwrap();
        let params = args.parameters();
        assert_eq!((params.width, params.height), (640, 480));
        assert_eq!(params.samples_per_pixel, 16);
        assert_eq!(params.bounces, 0);
        assert_eq!(params.pool_ray_count, 4096);
        assert_eq!(params.device_index, 1);
        assert_eq!(params.camera_origin, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(params.camera_target, Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(params.camera_fov, 0.5);
        assert_eq!(params.shader_dir, Some(PathBuf::from("build/shaders")));
    }

    #[test]
    fn malformed_vectors_are_rejected() {
        assert!(parse_vec3("1,2").is_err());
        assert!(parse_vec3("1,2,3,4").is_err());
        assert!(parse_vec3("a,b,c").is_err());
        assert_eq!(parse_vec3("-1,0.5,2"), Ok(Vec3::new(-1.0, 0.5, 2.0)));
    }

    #[test]
    fn missing_output_is_an_error() {
        assert!(Args::try_parse_from(["tracer", "scene.gsd"]).is_err());
    }
}
