use std::fs;
use std::path::PathBuf;

use rfdocgen::compositor::paginate;
use rfdocgen::rendering::raster::SoftwareRasterizer;
use rfdocgen::{DocumentContext, GeneratorConfig, HtmlDocument, PageGeometry, Rasterizer};

fn golden_path(name: &str) -> PathBuf {
    let mut p = PathBuf::from("tests/goldens/expected");
    p.push(name);
    p
}

/// Digest of the captured bitmap plus the page bands cut from it
fn render_fixture(page: &str) -> String {
    let config = GeneratorConfig::default();
    let document = HtmlDocument::new(None).unwrap();
    let id = document.attach(page, &config.surface_style()).expect("attach");
    let bitmap = SoftwareRasterizer::offline()
        .rasterize(&document, id, &config.capture_options())
        .expect("rasterize");
    document.detach(id).unwrap();

    let slices = paginate(bitmap.width(), bitmap.height(), &PageGeometry::A4_PORTRAIT).expect("paginate");
    let mut out = format!("{}x{} {}\n", bitmap.width(), bitmap.height(), bitmap.digest().unwrap());
    for s in slices {
        out.push_str(&format!(
            "page {}: src {:.3}+{:.3}px at {:.3}mm, {:.3}mm tall\n",
            s.index, s.source_y_offset_px, s.source_height_px, s.page_y_offset_mm, s.rendered_height_mm
        ));
    }
    out
}

#[test]
fn agreement_fits_one_centred_page() {
    let page = fs::read_to_string("tests/goldens/pages/agreement.html").expect("read fixture");
    let rendered = render_fixture(&page);
    let mut lines = rendered.lines();
    assert!(lines.next().unwrap().starts_with("1600x758 "));
    assert_eq!(lines.next(), Some("page 0: src 0.000+758.000px at 98.756mm, 99.487mm tall"));
    assert_eq!(lines.next(), None);
}

#[test]
fn golden_raster_matches_fixture() {
    let page = fs::read_to_string("tests/goldens/pages/agreement.html").expect("read fixture");
    let rendered = render_fixture(&page);

    // rendering is deterministic
    assert_eq!(rendered, render_fixture(&page));

    let expected_path = golden_path("agreement.txt");
    if std::env::var("UPDATE_GOLDENS").is_ok() {
        fs::create_dir_all("tests/goldens/expected").ok();
        fs::write(&expected_path, &rendered).expect("write golden");
        println!("Updated golden: {:?}", expected_path);
        return;
    }

    let expected = fs::read_to_string(&expected_path)
        .unwrap_or_else(|e| panic!("missing golden {:?} ({}); run with UPDATE_GOLDENS=1", expected_path, e));
    pretty_assertions::assert_eq!(expected, rendered);
}
