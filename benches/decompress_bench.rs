use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ebook2txt::codec::{get_codec, CompressionKind};
use ebook2txt::container::Container;
use ebook2txt::encoding::resolve;
use ebook2txt::markup::{strip_with, MarkupBackend};
use ebook2txt::writer::ContainerBuilder;

fn sample_html(paragraphs: usize) -> String {
    let mut html = String::from("<html><head><style>p { text-indent: 1em }</style></head><body>");
    for i in 0..paragraphs {
        html.push_str(&format!(
            "<p>Paragraph {i}: the quick brown fox jumps over the lazy dog &amp; keeps running.</p>\n"
        ));
    }
    html.push_str("</body></html>");
    html
}

fn bench_palmdoc(c: &mut Criterion) {
    let codec = get_codec(CompressionKind::PalmDoc).unwrap();
    let record = sample_html(60).into_bytes();
    let record = &record[..4096.min(record.len())];
    let packed = codec.compress(record);

    c.bench_function("palmdoc_decompress_4k", |b| b.iter(|| codec.decompress(black_box(&packed))));
    c.bench_function("palmdoc_compress_4k", |b| b.iter(|| codec.compress(black_box(record))));
}

fn bench_resolve(c: &mut Criterion) {
    let utf8 = sample_html(200).into_bytes();
    let gb_src = "<p>天下大势，分久必合，合久必分。</p>".repeat(200);
    let (gb, _, _) = encoding_rs::GB18030.encode(&gb_src);

    c.bench_function("resolve_utf8_strict", |b| b.iter(|| resolve(black_box(&utf8))));
    c.bench_function("resolve_gb18030_fallback", |b| b.iter(|| resolve(black_box(&gb))));
}

fn bench_strip(c: &mut Criterion) {
    let html = sample_html(200);

    c.bench_function("strip_dom_200p", |b| b.iter(|| strip_with(black_box(&html), MarkupBackend::Dom)));
    c.bench_function("strip_regex_200p", |b| b.iter(|| strip_with(black_box(&html), MarkupBackend::Regex)));
}

fn bench_book(c: &mut Criterion) {
    let text = sample_html(2000);
    let book = ContainerBuilder::new("bench").build(text.as_bytes()).unwrap();

    c.bench_function("parse_and_decompress_book", |b| {
        b.iter(|| {
            let container = Container::parse(black_box(&book)).unwrap();
            let codec = get_codec(container.metadata.compression).unwrap();
            let mut out = Vec::with_capacity(container.metadata.text_length as usize);
            for range in container.text_records() {
                out.extend_from_slice(&codec.decompress(&book[range]).0);
            }
            out
        })
    });
}

criterion_group!(benches, bench_palmdoc, bench_resolve, bench_strip, bench_book);
criterion_main!(benches);
