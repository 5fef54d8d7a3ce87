use crate::core::config::MediaConfig;
use crate::core::error::StoryError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;

const CONCAT_LIST_FILE: &str = "concat_list.txt";
/// Output prefix handed to pdftoppm; it writes `raster-1.png`, `raster-01.png`, ...
const RASTER_PREFIX: &str = "raster";

#[async_trait]
pub trait VideoComposer: Send + Sync {
    /// Renders every page the PDF actually has to `out_dir/{index}.png`, index 0
    /// being the cover, and returns them in page order.
    async fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>>;

    /// Still image held for the length of the narration.
    async fn clip(&self, image: &Path, audio: &Path, out: &Path) -> Result<()>;

    /// Joins clips in the given order.
    async fn concat(&self, clips: &[PathBuf], out: &Path) -> Result<()>;
}

pub struct FfmpegVideoComposer {
    ffmpeg_bin: String,
    pdftoppm_bin: String,
    fps: u32,
}

impl FfmpegVideoComposer {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            pdftoppm_bin: config.pdftoppm_bin.clone(),
            fps: config.fps,
        }
    }

    fn rasterize_args(pdf: &Path, out_dir: &Path) -> Vec<OsString> {
        vec![
            "-png".into(),
            "-r".into(),
            "72".into(),
            pdf.into(),
            // pdftoppm appends the page number and extension itself.
            out_dir.join(RASTER_PREFIX).into(),
        ]
    }

    fn clip_args(&self, image: &Path, audio: &Path, out: &Path) -> Vec<OsString> {
        vec![
            "-y".into(),
            "-loop".into(),
            "1".into(),
            "-i".into(),
            image.into(),
            "-i".into(),
            audio.into(),
            "-c:v".into(),
            "libx264".into(),
            "-tune".into(),
            "stillimage".into(),
            "-r".into(),
            self.fps.to_string().into(),
            // libx264 needs even dimensions.
            "-vf".into(),
            "scale=trunc(iw/2)*2:trunc(ih/2)*2".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-c:a".into(),
            "aac".into(),
            "-shortest".into(),
            out.into(),
        ]
    }

    fn concat_args(list: &Path, out: &Path) -> Vec<OsString> {
        vec![
            "-y".into(),
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list.into(),
            "-c".into(),
            "copy".into(),
            out.into(),
        ]
    }

    async fn run(&self, program: &str, args: Vec<OsString>) -> Result<()> {
        debug!("Running {} {:?}", program, args);
        let output = Command::new(program)
            .args(&args)
            .kill_on_drop(true)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to spawn '{}'", program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StoryError::backend(
                program,
                format!("{}: {}", output.status, stderr.trim()),
            )
            .into());
        }
        Ok(())
    }
}

/// Page number of a pdftoppm output name such as `raster-07.png`.
fn raster_page_number(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(RASTER_PREFIX)?
        .strip_prefix('-')?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

/// pdftoppm outputs in `dir`, ordered by page number.
async fn collect_rasters(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut numbered = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if let Some(page) = raster_page_number(&entry.file_name().to_string_lossy()) {
            numbered.push((page, entry.path()));
        }
    }
    numbered.sort_by_key(|(page, _)| *page);
    Ok(numbered.into_iter().map(|(_, path)| path).collect())
}

/// ffmpeg concat demuxer list; single quotes in paths are escaped.
pub fn concat_list(clips: &[PathBuf]) -> String {
    clips
        .iter()
        .map(|clip| {
            format!(
                "file '{}'\n",
                clip.to_string_lossy().replace('\'', "'\\''")
            )
        })
        .collect()
}

#[async_trait]
impl VideoComposer for FfmpegVideoComposer {
    async fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(out_dir).await?;
        // Leftovers from an earlier, longer book would be counted as pages.
        for stale in collect_rasters(out_dir).await? {
            tokio::fs::remove_file(&stale).await?;
        }

        self.run(&self.pdftoppm_bin, Self::rasterize_args(pdf, out_dir))
            .await?;

        let mut rasters = Vec::new();
        for (index, output) in collect_rasters(out_dir).await?.into_iter().enumerate() {
            let raster = out_dir.join(format!("{}.png", index));
            tokio::fs::rename(&output, &raster).await?;
            rasters.push(raster);
        }
        info!("Rasterized {} pages of {:?}", rasters.len(), pdf);
        Ok(rasters)
    }

    async fn clip(&self, image: &Path, audio: &Path, out: &Path) -> Result<()> {
        if let Some(parent) = out.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.run(&self.ffmpeg_bin, self.clip_args(image, audio, out))
            .await
    }

    async fn concat(&self, clips: &[PathBuf], out: &Path) -> Result<()> {
        let dir = out.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(dir).await?;

        // Relative entries would resolve against the list file's directory.
        let mut absolute = Vec::with_capacity(clips.len());
        for clip in clips {
            absolute.push(std::path::absolute(clip)?);
        }
        let list = dir.join(CONCAT_LIST_FILE);
        tokio::fs::write(&list, concat_list(&absolute)).await?;

        let result = self.run(&self.ffmpeg_bin, Self::concat_args(&list, out)).await;
        tokio::fs::remove_file(&list).await.ok();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_rasterize_args_render_whole_document() {
        let args = strings(FfmpegVideoComposer::rasterize_args(
            Path::new("data/story.pdf"),
            Path::new("data/image"),
        ));
        assert!(!args.contains(&"-f".to_string()));
        assert!(!args.contains(&"-singlefile".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("data/image/raster"));
    }

    #[test]
    fn test_raster_page_number() {
        assert_eq!(raster_page_number("raster-1.png"), Some(1));
        assert_eq!(raster_page_number("raster-010.png"), Some(10));
        assert_eq!(raster_page_number("raster-1.jpg"), None);
        assert_eq!(raster_page_number("title.png"), None);
        assert_eq!(raster_page_number("0.png"), None);
    }

    #[tokio::test]
    async fn test_collect_rasters_orders_by_page_and_ignores_other_files() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        for name in ["raster-10.png", "raster-02.png", "raster-01.png", "title.jpg", "0.png"] {
            std::fs::write(temp_dir.path().join(name), b"png")?;
        }

        let rasters = collect_rasters(temp_dir.path()).await?;

        let names: Vec<String> = rasters
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["raster-01.png", "raster-02.png", "raster-10.png"]);
        Ok(())
    }

    #[test]
    fn test_clip_args_use_configured_fps() {
        let composer = FfmpegVideoComposer::new(&MediaConfig::default());
        let args = strings(composer.clip_args(
            Path::new("image/0.png"),
            Path::new("audio/title.mp3"),
            Path::new("video/0.mp4"),
        ));
        let fps = args.iter().position(|a| a == "-r").map(|i| args[i + 1].clone());
        assert_eq!(fps.as_deref(), Some("24"));
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"aac".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("video/0.mp4"));
    }

    #[test]
    fn test_concat_list_preserves_order_and_escapes() {
        let list = concat_list(&[
            PathBuf::from("/data/video/0.mp4"),
            PathBuf::from("/data/video/1.mp4"),
            PathBuf::from("/data/annie's/2.mp4"),
        ]);
        assert_eq!(
            list,
            "file '/data/video/0.mp4'\nfile '/data/video/1.mp4'\nfile '/data/annie'\\''s/2.mp4'\n"
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let composer = FfmpegVideoComposer::new(&MediaConfig {
            ffmpeg_bin: "storybook-no-such-ffmpeg".to_string(),
            ..MediaConfig::default()
        });
        let temp_dir = tempfile::tempdir().unwrap();
        let result = composer
            .clip(
                &temp_dir.path().join("0.png"),
                &temp_dir.path().join("title.mp3"),
                &temp_dir.path().join("video/0.mp4"),
            )
            .await;
        assert!(result.is_err());
    }
}
