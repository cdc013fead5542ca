use airplay_slideshow::streaming::{
    ImageOutput, ImagePreparer, blend, content_key, fit_within, letterbox,
};
use airplay_slideshow::testing::fixtures::write_image;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{DynamicImage, Rgb, RgbImage};

fn benchmark_frames(c: &mut Criterion) {
    let photo = DynamicImage::ImageRgb8(RgbImage::from_pixel(1920, 1280, Rgb([40, 90, 160])));

    c.bench_function("fit_within_1080p", |b| {
        b.iter(|| fit_within(black_box(photo.clone()), (1920, 1080)));
    });

    c.bench_function("letterbox_720p", |b| {
        b.iter(|| letterbox(black_box(&photo), (1280, 720)));
    });

    let from = RgbImage::from_pixel(1280, 720, Rgb([0, 0, 0]));
    let to = RgbImage::from_pixel(1280, 720, Rgb([255, 255, 255]));
    c.bench_function("blend_720p", |b| {
        b.iter(|| blend(black_box(&from), black_box(&to), 0.5));
    });
}

fn benchmark_content_key(c: &mut Criterion) {
    let data = vec![0xA5u8; 2 * 1024 * 1024];
    c.bench_function("content_key_2mb", |b| {
        b.iter(|| content_key(&[black_box(&data), b"1920x1080:85"]));
    });
}

fn benchmark_prepare(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.png");
    write_image(&path, 1024, 768, [200, 120, 40]).unwrap();

    let output = ImageOutput {
        max_size: (640, 480),
        quality: 85,
    };

    // Fresh preparer per iteration: measures decode, resize and encode
    c.bench_function("prepare_uncached", |b| {
        b.to_async(&runtime).iter(|| async {
            let preparer = ImagePreparer::new(output, 4);
            preparer.prepare(black_box(&path)).await.unwrap()
        });
    });

    let warm = ImagePreparer::new(output, 4);
    runtime.block_on(warm.prepare(&path)).unwrap();
    c.bench_function("prepare_cached", |b| {
        b.to_async(&runtime)
            .iter(|| async { warm.prepare(black_box(&path)).await.unwrap() });
    });
}

criterion_group!(benches, benchmark_frames, benchmark_content_key, benchmark_prepare);
criterion_main!(benches);
