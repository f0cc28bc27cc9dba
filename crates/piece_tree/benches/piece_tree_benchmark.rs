use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use piece_tree::{EndOfLine, PieceTree, StringBuffer};
use std::hint::black_box;

fn document(size: usize) -> String {
    let mut text = String::with_capacity(size);
    while text.len() < size {
        text.push_str("lorem ipsum dolor sit amet\n");
    }
    text.truncate(size);
    text
}

fn tree_from(text: &str) -> PieceTree {
    PieceTree::new(
        vec![StringBuffer::new(text.to_string())],
        EndOfLine::Lf,
        false,
    )
}

fn bench_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("creation");

    for size in [1_000, 10_000, 100_000].iter() {
        let text = document(*size);

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("piece_tree", size), size, |b, _| {
            b.iter(|| {
                let tree = tree_from(black_box(text.as_str()));
                black_box(tree);
            })
        });

        group.bench_with_input(BenchmarkId::new("ropey", size), size, |b, _| {
            b.iter(|| {
                let rope = ropey::Rope::from_str(black_box(text.as_str()));
                black_box(rope);
            })
        });

        group.bench_with_input(BenchmarkId::new("string", size), size, |b, _| {
            b.iter(|| {
                let string = black_box(text.clone());
                black_box(string);
            })
        });
    }
    group.finish();
}

fn bench_insert_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");

    for size in [1_000, 10_000, 100_000].iter() {
        let text = document(*size);
        let insert_text = "INSERTED";

        group.throughput(Throughput::Elements(1));

        for (position_name, offset) in [("beginning", 0), ("middle", size / 2), ("end", *size)] {
            group.bench_with_input(
                BenchmarkId::new(format!("piece_tree_{position_name}"), size),
                size,
                |b, _| {
                    b.iter_batched(
                        || tree_from(text.as_str()),
                        |mut tree| {
                            tree.insert(black_box(offset), black_box(insert_text))
                                .unwrap();
                            black_box(tree);
                        },
                        criterion::BatchSize::SmallInput,
                    )
                },
            );

            group.bench_with_input(
                BenchmarkId::new(format!("ropey_{position_name}"), size),
                size,
                |b, _| {
                    b.iter_batched(
                        || ropey::Rope::from_str(text.as_str()),
                        |mut rope| {
                            rope.insert(black_box(offset), black_box(insert_text));
                            black_box(rope);
                        },
                        criterion::BatchSize::SmallInput,
                    )
                },
            );

            group.bench_with_input(
                BenchmarkId::new(format!("string_{position_name}"), size),
                size,
                |b, _| {
                    b.iter_batched(
                        || text.clone(),
                        |mut string| {
                            string.insert_str(black_box(offset), black_box(insert_text));
                            black_box(string);
                        },
                        criterion::BatchSize::SmallInput,
                    )
                },
            );
        }
    }
    group.finish();
}

fn bench_delete_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("delete");

    for size in [1_000, 10_000, 100_000].iter() {
        let text = document(*size);
        let delete_size = size / 10;

        group.throughput(Throughput::Elements(delete_size as u64));

        let start = size / 2 - delete_size / 2;
        group.bench_with_input(BenchmarkId::new("piece_tree_middle", size), size, |b, _| {
            b.iter_batched(
                || tree_from(text.as_str()),
                |mut tree| {
                    tree.delete(black_box(start), black_box(delete_size)).unwrap();
                    black_box(tree);
                },
                criterion::BatchSize::SmallInput,
            )
        });

        group.bench_with_input(BenchmarkId::new("ropey_middle", size), size, |b, _| {
            b.iter_batched(
                || ropey::Rope::from_str(text.as_str()),
                |mut rope| {
                    rope.remove(black_box(start..start + delete_size));
                    black_box(rope);
                },
                criterion::BatchSize::SmallInput,
            )
        });

        group.bench_with_input(BenchmarkId::new("string_middle", size), size, |b, _| {
            b.iter_batched(
                || text.clone(),
                |mut string| {
                    string.replace_range(black_box(start..start + delete_size), "");
                    black_box(string);
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_line_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_reads");

    for size in [10_000, 100_000].iter() {
        let text = document(*size);
        let tree = tree_from(text.as_str());
        let rope = ropey::Rope::from_str(text.as_str());
        let middle_line = tree.line_count() / 2;

        group.throughput(Throughput::Elements(1));

        group.bench_with_input(BenchmarkId::new("piece_tree", size), &tree, |b, tree| {
            b.iter(|| {
                let line = tree.get_line_content(black_box(middle_line)).unwrap();
                black_box(line);
            })
        });

        group.bench_with_input(BenchmarkId::new("ropey", size), &rope, |b, rope| {
            b.iter(|| {
                let line = rope.line(black_box(middle_line)).to_string();
                black_box(line);
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_creation,
    bench_insert_operations,
    bench_delete_operations,
    bench_line_reads
);
criterion_main!(benches);
