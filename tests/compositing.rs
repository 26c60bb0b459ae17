use std::fs;
use std::sync::Mutex;

use dmriqc_mosaic::blend::{MASK_HIGHLIGHT, blend_volumes};
use dmriqc_mosaic::{
    BlendOptions, Coloring, Composite, LabelSource, MosaicError, MosaicOptions, TextRenderer,
    Volume, screenshot_mosaic,
};
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, GrayImage, Luma, Rgb};
use ndarray::{Array3, Array4};

/// Draws every string as a 2x2 block and records what was asked for.
#[derive(Default)]
struct RecordingText {
    seen: Mutex<Vec<String>>,
}

impl TextRenderer for RecordingText {
    fn render(&self, text: &str, _size: f32) -> dmriqc_mosaic::Result<GrayImage> {
        self.seen.lock().unwrap().push(text.to_owned());
        Ok(GrayImage::from_pixel(2, 2, Luma([255])))
    }
}

fn grid_options() -> MosaicOptions {
    MosaicOptions {
        skip: 1,
        pad: 2,
        nb_columns: 3,
        three_axis: false,
        ..MosaicOptions::default()
    }
}

/// 10x10x6: slice 0 is 2, the others 1, with zero borders at x = 0 and x = 9.
fn small_volume() -> Volume {
    Volume::from_3d(Array3::from_shape_fn((10, 10, 6), |(x, _, z)| {
        if x == 0 || x == 9 {
            0.0
        } else if z == 0 {
            2.0
        } else {
            1.0
        }
    }))
    .unwrap()
}

#[test]
fn grid_geometry_and_first_cell() {
    let composite =
        screenshot_mosaic(&small_volume(), &grid_options(), &RecordingText::default()).unwrap();
    let Composite::Still(image) = composite else {
        panic!("3D volume should give a still");
    };
    // Two rows of three 10x10 slices with a 2 px gutter all round.
    assert_eq!(image.dimensions(), (3 * (10 + 2) + 2, 2 * (10 + 2) + 2));

    assert_eq!(image.get_pixel(0, 0), &Rgb([0, 0, 0]));
    assert_eq!(image.get_pixel(6, 7), &Rgb([255, 255, 255]));
    assert_eq!(image.get_pixel(2, 7), &Rgb([0, 0, 0]));
    assert_eq!(image.get_pixel(11, 7), &Rgb([0, 0, 0]));
    // Slice 1 sits in the next cell, at half intensity.
    assert_eq!(image.get_pixel(14 + 4, 7), &Rgb([127, 127, 127]));
    // The sixth cell holds slice 5; nothing spills into the bottom gutter.
    assert_eq!(image.get_pixel(26 + 4, 14 + 4), &Rgb([127, 127, 127]));
    assert_eq!(image.get_pixel(30, 25), &Rgb([0, 0, 0]));
}

#[test]
fn series_becomes_counted_gif() {
    let data = Array4::from_shape_fn((10, 10, 6, 4), |(x, y, _, t)| (x + y + t) as f32 + 0.5);
    let volume = Volume::from_4d(data).unwrap();
    let text = RecordingText::default();
    let options = MosaicOptions {
        frame_duration_ms: 100,
        ..grid_options()
    };
    let composite = screenshot_mosaic(&volume, &options, &text).unwrap();
    assert_eq!(composite.extension(), "gif");
    assert_eq!(
        *text.seen.lock().unwrap(),
        vec!["0/4", "1/4", "2/4", "3/4"]
    );

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("series.gif");
    composite.save(&path, options.frame_duration_ms).unwrap();

    let file = fs::File::open(&path).unwrap();
    let decoder = GifDecoder::new(std::io::BufReader::new(file)).unwrap();
    let frames = decoder.into_frames().collect_frames().unwrap();
    assert_eq!(frames.len(), 4);
    for frame in &frames {
        assert_eq!(frame.delay().numer_denom_ms(), (100, 1));
        assert_eq!(frame.buffer().dimensions(), (38, 26));
    }
}

#[test]
fn lut_colours_labels_and_rejects_unknown_ones() {
    let dir = tempfile::tempdir().unwrap();
    let lut = dir.path().join("labels.lut");
    fs::write(&lut, "5 10 20 30\n7 40 50 60\n").unwrap();

    let labels = Array3::from_shape_fn((10, 10, 6), |(x, _, z)| match (x, z) {
        (0, _) => 0.0,
        (_, 0) => 5.0,
        _ => 7.0,
    });
    let options = MosaicOptions {
        coloring: Coloring::Labels(LabelSource::LutFile(lut)),
        ..grid_options()
    };
    let text = RecordingText::default();

    let composite =
        screenshot_mosaic(&Volume::from_3d(labels.clone()).unwrap(), &options, &text).unwrap();
    let image = &composite.frames()[0];
    assert_eq!(image.get_pixel(6, 7), &Rgb([10, 20, 30]));
    assert_eq!(image.get_pixel(14 + 4, 7), &Rgb([40, 50, 60]));

    let mut unknown = labels;
    unknown[[4, 4, 3]] = 9.0;
    let result = screenshot_mosaic(&Volume::from_3d(unknown).unwrap(), &options, &text);
    assert!(matches!(
        result,
        Err(MosaicError::UnmappedLabel { label: 9 })
    ));
}

#[test]
fn blend_weights_select_base_or_overlay() {
    let base = small_volume();
    let mut mask = Array3::<f32>::zeros((10, 10, 6));
    mask.slice_mut(ndarray::s![3..6, 3..6, ..]).fill(1.0);
    let mask = Volume::from_3d(mask).unwrap();
    let text = RecordingText::default();
    let options = grid_options();

    let base_only = screenshot_mosaic(&base, &options, &text).unwrap();
    let at_zero = blend_volumes(
        &base,
        &mask,
        &options,
        &BlendOptions {
            blend_val: 0.0,
            is_mask: true,
            overlay_labels: None,
        },
        &text,
    )
    .unwrap();
    assert_eq!(at_zero, base_only);

    let at_one = blend_volumes(
        &base,
        &mask,
        &options,
        &BlendOptions {
            blend_val: 1.0,
            is_mask: true,
            overlay_labels: None,
        },
        &text,
    )
    .unwrap();
    let image = &at_one.frames()[0];
    let red = image.pixels().filter(|p| **p == MASK_HIGHLIGHT).count();
    assert_eq!(red, 6 * 3 * 3);
    assert!(
        image
            .pixels()
            .all(|p| *p == MASK_HIGHLIGHT || *p == Rgb([0, 0, 0]))
    );
}

#[test]
fn label_overlay_blends_in_lut_colours() {
    let dir = tempfile::tempdir().unwrap();
    let lut = dir.path().join("overlay.lut");
    fs::write(&lut, "5 10 20 30\n").unwrap();

    let base = small_volume();
    let mut labels = Array3::<f32>::zeros((10, 10, 6));
    labels.slice_mut(ndarray::s![3..6, 3..6, ..]).fill(5.0);
    let text = RecordingText::default();
    let blend = BlendOptions {
        blend_val: 1.0,
        is_mask: false,
        overlay_labels: Some(LabelSource::LutFile(lut)),
    };

    let overlay = Volume::from_3d(labels.clone()).unwrap();
    let composite = blend_volumes(&base, &overlay, &grid_options(), &blend, &text).unwrap();
    let image = &composite.frames()[0];
    let coloured = image.pixels().filter(|p| **p == Rgb([10, 20, 30])).count();
    assert_eq!(coloured, 6 * 3 * 3);
    assert!(
        image
            .pixels()
            .all(|p| *p == Rgb([10, 20, 30]) || *p == Rgb([0, 0, 0]))
    );

    let generated = BlendOptions {
        overlay_labels: Some(LabelSource::Generated),
        ..blend.clone()
    };
    let composite = blend_volumes(&base, &overlay, &grid_options(), &generated, &text).unwrap();
    let lit = composite.frames()[0]
        .pixels()
        .filter(|p| **p != Rgb([0, 0, 0]))
        .count();
    assert_eq!(lit, 6 * 3 * 3);

    let mut unknown = labels;
    unknown[[4, 4, 2]] = 9.0;
    let overlay = Volume::from_3d(unknown).unwrap();
    assert!(matches!(
        blend_volumes(&base, &overlay, &grid_options(), &blend, &text),
        Err(MosaicError::UnmappedLabel { label: 9 })
    ));
}

#[test]
fn rendering_twice_writes_identical_files() {
    let dir = tempfile::tempdir().unwrap();
    let options = MosaicOptions {
        three_axis: true,
        coloring: Coloring::Colormap("jet".into()),
        ..grid_options()
    };
    let mut written = Vec::new();
    for name in ["first.png", "second.png"] {
        let composite =
            screenshot_mosaic(&small_volume(), &options, &RecordingText::default()).unwrap();
        let path = dir.path().join(name);
        composite.save(&path, options.frame_duration_ms).unwrap();
        written.push(fs::read(path).unwrap());
    }
    assert_eq!(written[0], written[1]);
}
