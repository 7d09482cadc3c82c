use criterion::{black_box, criterion_group, criterion_main, Criterion};
use genchat::protocol::StreamEvent;
use genchat::stream::{dispatch, EventHandler, FrameDecoder};

#[derive(Default)]
struct Sink {
    text_bytes: usize,
    previews: usize,
}

impl EventHandler for Sink {
    fn on_status(&mut self, _message: String) {}

    fn on_text(&mut self, delta: String) {
        self.text_bytes += delta.len();
    }

    fn on_partial_image(&mut self, _image_b64: String, _index: u64) {
        self.previews += 1;
    }

    fn on_image(&mut self, _image_url: String, _content: Option<String>) {}

    fn on_result(&mut self, _content: String, _image_url: Option<String>) {}

    fn on_done(&mut self) {}

    fn on_error(&mut self, _message: String) {}
}

fn text_wire(deltas: usize) -> Vec<u8> {
    let mut wire = String::new();
    for idx in 0..deltas {
        wire.push_str(
            &StreamEvent::Text {
                content: format!("token-{idx} "),
            }
            .to_frame(),
        );
    }
    wire.push_str(&StreamEvent::Done.to_frame());
    wire.into_bytes()
}

fn image_wire(previews: usize, preview_len: usize) -> Vec<u8> {
    let mut wire = String::new();
    for index in 0..previews {
        wire.push_str(
            &StreamEvent::PartialImage {
                image_b64: "A".repeat(preview_len),
                index: index as u64,
            }
            .to_frame(),
        );
    }
    wire.push_str(
        &StreamEvent::ImageSolo {
            image_url: "/images/final.png".to_string(),
            content: None,
        }
        .to_frame(),
    );
    wire.into_bytes()
}

fn decode_all(wire: &[u8], chunk: usize) -> Sink {
    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    let mut sink = Sink::default();
    for piece in wire.chunks(chunk) {
        decoder.feed_bytes(piece, &mut frames);
        for frame in frames.drain(..) {
            dispatch(&frame, &mut sink);
        }
    }
    if let Some(frame) = decoder.finish() {
        dispatch(&frame, &mut sink);
    }
    sink
}

fn bench_frame_decode(c: &mut Criterion) {
    let text = text_wire(2_000);
    let image = image_wire(3, 256 * 1024);

    c.bench_function("decode_text_deltas_64b_chunks", |b| {
        b.iter(|| black_box(decode_all(black_box(&text), 64)));
    });

    c.bench_function("decode_text_deltas_16k_chunks", |b| {
        b.iter(|| black_box(decode_all(black_box(&text), 16 * 1024)));
    });

    c.bench_function("decode_partial_images_4k_chunks", |b| {
        b.iter(|| black_box(decode_all(black_box(&image), 4 * 1024)));
    });
}

criterion_group!(benches, bench_frame_decode);
criterion_main!(benches);
