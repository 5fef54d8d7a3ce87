//! Picture-book PDF: the title image as a full-bleed cover, then one page per
//! story page with its image as background and the sentence overlaid on
//! alternating halves of the page.

use crate::core::artifacts::ArtifactStore;
use crate::core::story::Story;
use crate::utils::text::wrap_text;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::info;
use printpdf::{
    image_crate::{self, GenericImageView},
    BuiltinFont, Color, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument, PdfLayerReference,
    Pt, Rgb,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Helvetica-Bold glyphs average a little over half the font size in width.
const AVG_GLYPH_WIDTH: f32 = 0.6;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PdfStyle {
    pub font_size: f32,
    pub leading_factor: f32,
    /// RGB in 0.0..=1.0.
    pub text_color: [f32; 3],
    pub margin: f32,
}

impl Default for PdfStyle {
    fn default() -> Self {
        Self {
            font_size: 45.0,
            leading_factor: 1.2,
            text_color: [0.827, 0.827, 0.827],
            margin: 50.0,
        }
    }
}

impl PdfStyle {
    pub fn leading(&self) -> f32 {
        self.font_size * self.leading_factor
    }

    /// Characters per line for a text block half the page wide.
    pub fn chars_per_line(&self, page_width: f32) -> usize {
        ((0.5 * page_width) / (self.font_size * AVG_GLYPH_WIDTH)).floor() as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextPlacement {
    Left,
    Right,
}

/// Story pages alternate sides, starting on the right half.
pub fn placement_for(page_index: usize) -> TextPlacement {
    if page_index % 2 == 0 {
        TextPlacement::Right
    } else {
        TextPlacement::Left
    }
}

/// Lower-left corner of the text block, in points from the bottom-left.
fn block_origin(placement: TextPlacement, width: f32, height: f32, style: &PdfStyle) -> (f32, f32) {
    let y = 0.5 * height - style.margin;
    match placement {
        TextPlacement::Right => (0.5 * width - style.margin, y),
        TextPlacement::Left => (style.margin, y),
    }
}

#[async_trait]
pub trait PdfComposer: Send + Sync {
    /// Writes the book for `story` to `out`, reading images from `image_dir`.
    async fn compose(&self, story: &Story, image_dir: &Path, out: &Path) -> Result<()>;
}

pub struct PrintPdfComposer {
    style: PdfStyle,
}

impl PrintPdfComposer {
    pub fn new(style: PdfStyle) -> Self {
        Self { style }
    }
}

#[async_trait]
impl PdfComposer for PrintPdfComposer {
    async fn compose(&self, story: &Story, image_dir: &Path, out: &Path) -> Result<()> {
        let story = story.clone();
        let image_dir = image_dir.to_path_buf();
        let out = out.to_path_buf();
        let style = self.style.clone();

        tokio::task::spawn_blocking(move || render_book(&story, &image_dir, &out, &style)).await?
    }
}

fn load_image(path: &Path) -> Result<image_crate::DynamicImage> {
    image_crate::open(path).with_context(|| format!("Failed to open image {:?}", path))
}

fn draw_background(layer: &PdfLayerReference, path: &Path, width: f32, height: f32) -> Result<()> {
    let picture = load_image(path)?;
    // At 72 dpi one pixel is one point; scale to cover the page exactly.
    let scale_x = width / picture.width() as f32;
    let scale_y = height / picture.height() as f32;
    Image::from_dynamic_image(&picture).add_to_layer(
        layer.clone(),
        ImageTransform {
            translate_x: Some(Mm(0.0)),
            translate_y: Some(Mm(0.0)),
            scale_x: Some(scale_x),
            scale_y: Some(scale_y),
            dpi: Some(72.0),
            ..Default::default()
        },
    );
    Ok(())
}

fn draw_text(
    layer: &PdfLayerReference,
    font: &IndirectFontRef,
    lines: &[String],
    origin: (f32, f32),
    style: &PdfStyle,
) {
    let [r, g, b] = style.text_color;
    let (x, bottom) = origin;
    // The block grows upwards from its lower edge; the cursor starts on the top line.
    let top_baseline = bottom + lines.len().saturating_sub(1) as f32 * style.leading();

    layer.set_fill_color(Color::Rgb(Rgb::new(r, g, b, None)));
    layer.begin_text_section();
    layer.set_font(font, style.font_size);
    layer.set_line_height(style.leading());
    layer.set_text_cursor(Mm::from(Pt(x)), Mm::from(Pt(top_baseline)));
    for line in lines {
        layer.write_text(line.clone(), font);
        layer.add_line_break();
    }
    layer.end_text_section();
}

fn render_book(story: &Story, image_dir: &Path, out: &Path, style: &PdfStyle) -> Result<()> {
    if let Some(missing) = required_images(story, image_dir)
        .into_iter()
        .find(|path| !path.exists())
    {
        bail!("Missing image {:?}", missing);
    }

    let title_path = image_dir.join(ArtifactStore::title_image_file());
    let cover = load_image(&title_path)?;
    let (width, height) = (cover.width() as f32, cover.height() as f32);
    let (page_w, page_h) = (Mm::from(Pt(width)), Mm::from(Pt(height)));
    info!("Composing {} pages at {}x{} pt", story.pages.len() + 1, width, height);

    let (doc, cover_page, cover_layer) = PdfDocument::new(story.title.as_str(), page_w, page_h, "Cover");
    let font = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| anyhow!("Failed to load Helvetica-Bold: {:?}", e))?;

    draw_background(
        &doc.get_page(cover_page).get_layer(cover_layer),
        &title_path,
        width,
        height,
    )?;

    let max_chars = style.chars_per_line(width);
    for (index, page) in story.pages.iter().enumerate() {
        let (page_idx, layer_idx) = doc.add_page(page_w, page_h, format!("Page {}", page.page_no));
        let layer = doc.get_page(page_idx).get_layer(layer_idx);
        let image_path = image_dir.join(ArtifactStore::page_image_file(page.page_no));
        draw_background(&layer, &image_path, width, height)?;

        let lines = wrap_text(&page.content, max_chars);
        let origin = block_origin(placement_for(index), width, height, style);
        draw_text(&layer, &font, &lines, origin, style);
    }

    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(out).with_context(|| format!("Failed to create {:?}", out))?;
    doc.save(&mut BufWriter::new(file))
        .map_err(|e| anyhow!("Failed to write PDF {:?}: {:?}", out, e))?;
    Ok(())
}

/// Images the composer will read for `story`, title first.
pub fn required_images(story: &Story, image_dir: &Path) -> Vec<PathBuf> {
    std::iter::once(image_dir.join(ArtifactStore::title_image_file()))
        .chain(
            story
                .pages
                .iter()
                .map(|p| image_dir.join(ArtifactStore::page_image_file(p.page_no))),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::story::Page;

    fn story() -> Story {
        Story {
            title: "Annie the Crocodile".to_string(),
            pages: vec![
                Page {
                    page_no: 1,
                    content: "Annie the crocodile lived by a sunny river.".to_string(),
                },
                Page {
                    page_no: 2,
                    content: "She loved to share her snacks.".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_placement_alternates_starting_right() {
        let sides: Vec<_> = (0..4).map(placement_for).collect();
        assert_eq!(
            sides,
            vec![
                TextPlacement::Right,
                TextPlacement::Left,
                TextPlacement::Right,
                TextPlacement::Left
            ]
        );
    }

    #[test]
    fn test_block_origin_matches_halves() {
        let style = PdfStyle::default();
        assert_eq!(
            block_origin(TextPlacement::Right, 1344.0, 768.0, &style),
            (622.0, 334.0)
        );
        assert_eq!(
            block_origin(TextPlacement::Left, 1344.0, 768.0, &style),
            (50.0, 334.0)
        );
    }

    #[test]
    fn test_wrap_width_fits_half_page() {
        let style = PdfStyle::default();
        assert_eq!(style.leading(), 54.0);
        let max = style.chars_per_line(1344.0);
        assert_eq!(max, 24);
        for line in wrap_text(&story().pages[0].content, max) {
            assert!(line.chars().count() <= max);
        }
    }

    #[test]
    fn test_required_images_title_first() {
        let dir = Path::new("/data/image");
        assert_eq!(
            required_images(&story(), dir),
            vec![
                dir.join("title.jpg"),
                dir.join("1.jpg"),
                dir.join("2.jpg")
            ]
        );
    }

    #[tokio::test]
    async fn test_compose_writes_pdf() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let image_dir = temp_dir.path().join("image");
        std::fs::create_dir_all(&image_dir)?;
        for path in required_images(&story(), &image_dir) {
            image_crate::RgbImage::from_pixel(64, 36, image_crate::Rgb([30, 120, 200]))
                .save_with_format(&path, image_crate::ImageFormat::Jpeg)?;
        }

        let out = temp_dir.path().join("story.pdf");
        PrintPdfComposer::new(PdfStyle::default())
            .compose(&story(), &image_dir, &out)
            .await?;

        let bytes = std::fs::read(&out)?;
        assert!(bytes.starts_with(b"%PDF"));
        Ok(())
    }

    #[tokio::test]
    async fn test_compose_fails_without_title_image() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let out = temp_dir.path().join("story.pdf");
        let result = PrintPdfComposer::new(PdfStyle::default())
            .compose(&story(), temp_dir.path(), &out)
            .await;
        assert!(result.is_err());
        assert!(!out.exists());
        Ok(())
    }
}
