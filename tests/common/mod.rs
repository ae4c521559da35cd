#![allow(dead_code)]

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use contract_sign::config::Config;
use contract_sign::convert::PdfPassthrough;
use contract_sign::engine::{ContractMetadata, CreatedContract, SigningEngine};
use contract_sign::render::SignatureRenderer;
use contract_sign::store::{MemoryArtifactStore, MemoryRecordStore};
use contract_sign::SourceFile;
use image::{ImageBuffer, ImageOutputFormat, Rgba, RgbaImage};
use lopdf::{Document, Object, Stream, dictionary};
use std::io::Cursor;
use std::sync::Arc;

pub const LETTER: (f64, f64) = (612.0, 792.0);

/// A PDF with one page per size, each page drawing `Page N` in Helvetica.
pub fn pdf(sizes: &[(f64, f64)]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for (n, &(width, height)) in sizes.iter().enumerate() {
        let ops = format!("BT /F1 12 Tf 72 {} Td (Page {}) Tj ET", height - 72.0, n + 1);
        let content_id = doc.add_object(Stream::new(dictionary! {}, ops.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), Object::Real(width as f32), Object::Real(height as f32)],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        });
        kids.push(Object::Reference(page_id));
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// `data:image/png;base64,...` of a solid dark rectangle.
pub fn png_data_url(width: u32, height: u32) -> String {
    let image: RgbaImage = ImageBuffer::from_pixel(width, height, Rgba([20, 20, 120, 255]));
    let mut png = Cursor::new(Vec::new());
    image.write_to(&mut png, ImageOutputFormat::Png).unwrap();
    format!("data:image/png;base64,{}", B64.encode(png.into_inner()))
}

/// Same as [`png_data_url`] but every pixel is fully transparent.
pub fn blank_png_data_url(width: u32, height: u32) -> String {
    let image: RgbaImage = ImageBuffer::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    let mut png = Cursor::new(Vec::new());
    image.write_to(&mut png, ImageOutputFormat::Png).unwrap();
    format!("data:image/png;base64,{}", B64.encode(png.into_inner()))
}

pub struct Harness {
    pub engine: Arc<SigningEngine>,
    pub records: Arc<MemoryRecordStore>,
    pub artifacts: Arc<MemoryArtifactStore>,
}

impl Harness {
    pub fn new() -> Self {
        let config = Config {
            public_base_url: "https://sign.example.com".to_string(),
            ..Config::default()
        };
        let records = Arc::new(MemoryRecordStore::new());
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let renderer = SignatureRenderer::with_builtin_font(&config.render);
        let engine = SigningEngine::new(
            config,
            records.clone(),
            artifacts.clone(),
            Arc::new(PdfPassthrough),
        )
        .with_renderer(renderer);
        Harness {
            engine: Arc::new(engine),
            records,
            artifacts,
        }
    }

    pub async fn upload(&self, sizes: &[(f64, f64)]) -> CreatedContract {
        self.engine
            .create_contract(
                SourceFile::new("Service Agreement.pdf", pdf(sizes)),
                ContractMetadata {
                    client_email: Some("client@example.com".to_string()),
                },
            )
            .await
            .unwrap()
    }
}

pub fn page_content(bytes: &[u8], page_number: u32) -> String {
    let doc = Document::load_mem(bytes).unwrap();
    let page_id = doc.get_pages()[&page_number];
    String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).into_owned()
}
