use criterion::{black_box, criterion_group, criterion_main, Criterion};

use chatwire::dispatch::ChatGenerateParse;
use chatwire::intake::PartTransmitter;
use chatwire::protocol::openai_chat::parser::OpenAiChatParser;
use chatwire::stream::{Demuxer, JsonNlDemuxer, SseDemuxer, Utf8ChunkDecoder, WireMessage};

fn openai_sse_body(frames: usize) -> String {
    let mut body = String::with_capacity(frames * 160);
    for i in 0..frames {
        body.push_str(
            "data: {\"id\":\"chatcmpl-1\",\"model\":\"gpt-4o-mini\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"token ",
        );
        body.push_str(&i.to_string());
        body.push_str("\"}}]}\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn ollama_body(lines: usize) -> String {
    let mut body = String::with_capacity(lines * 120);
    for i in 0..lines {
        body.push_str("{\"model\":\"llama3.2\",\"message\":{\"role\":\"assistant\",\"content\":\"token ");
        body.push_str(&i.to_string());
        body.push_str("\"},\"done\":false}\n");
    }
    body
}

/// Split into fixed-size network-like chunks, ignoring char boundaries.
fn chunked(body: &str, size: usize) -> Vec<&[u8]> {
    body.as_bytes().chunks(size).collect()
}

fn bench_demux(c: &mut Criterion) {
    let sse = openai_sse_body(512);
    let sse_chunks = chunked(&sse, 1024);
    let nl = ollama_body(512);
    let nl_chunks = chunked(&nl, 1024);

    c.bench_function("sse_demux_512_frames", |b| {
        b.iter(|| {
            let mut decoder = Utf8ChunkDecoder::new();
            let mut demuxer = SseDemuxer::new();
            let mut count = 0usize;
            for chunk in &sse_chunks {
                let text = decoder.decode(black_box(chunk));
                count += demuxer.demux(&text).len();
            }
            black_box(count)
        });
    });

    c.bench_function("json_nl_demux_512_lines", |b| {
        b.iter(|| {
            let mut decoder = Utf8ChunkDecoder::new();
            let mut demuxer = JsonNlDemuxer::new();
            let mut count = 0usize;
            for chunk in &nl_chunks {
                let text = decoder.decode(black_box(chunk));
                count += demuxer.demux(&text).len();
            }
            black_box(count)
        });
    });

    c.bench_function("sse_demux_and_parse_openai", |b| {
        let parser = OpenAiChatParser::new(true);
        b.iter(|| {
            let mut decoder = Utf8ChunkDecoder::new();
            let mut demuxer = SseDemuxer::new();
            let mut tx = PartTransmitter::default();
            let mut ops = 0usize;
            for chunk in &sse_chunks {
                let text = decoder.decode(black_box(chunk));
                for message in demuxer.demux(&text) {
                    if let WireMessage::Event { data, name } = message {
                        if data == "[DONE]" {
                            break;
                        }
                        let _ = parser.parse(&mut tx, &data, name.as_deref());
                        ops += tx.drain_ready().len();
                    }
                }
            }
            black_box(ops)
        });
    });
}

criterion_group!(benches, bench_demux);
criterion_main!(benches);
