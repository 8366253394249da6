use {
	contex::{Encoding, TokenizerAdapter, Value},
	criterion::{criterion_group, criterion_main, Criterion},
};

fn rows(n: usize) -> Vec<Value> {
	(0..n)
		.map(|i| {
			Value::from(serde_json::json!({
				"id": i,
				"name": format!("user-{i}"),
				"role": if i % 2 == 0 { "admin" } else { "reviewer" },
				"tags": ["alpha", "beta"],
				"score": (i as f64) / 3.0,
			}))
		})
		.collect()
}

fn bench_codec(c: &mut Criterion) {
	let adapter = TokenizerAdapter::new(Encoding::Cl100kBase).expect("load cl100k_base");
	let small = rows(10);
	let big = rows(1_000);

	c.bench_function("encode_binary/small", |b| {
		b.iter(|| contex::encode_binary(&small, &adapter).unwrap())
	});
	c.bench_function("encode_binary/big", |b| {
		b.iter(|| contex::encode_binary(&big, &adapter).unwrap())
	});

	let bytes = contex::encode_binary(&big, &adapter).unwrap();
	c.bench_function("decode_binary/big", |b| {
		b.iter(|| contex::decode_binary(&bytes, &adapter).unwrap())
	});

	c.bench_function("encode_text/big", |b| {
		b.iter(|| contex::encode_text(&big, &adapter, None).unwrap())
	});
	let text = contex::encode_text(&big, &adapter, None).unwrap();
	c.bench_function("decode_text/big", |b| {
		b.iter(|| contex::decode_text(&text).unwrap())
	});
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
