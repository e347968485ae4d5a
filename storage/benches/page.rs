use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use storage::build::{encode_tuple, Field, PageBuilder};
use storage::page::DEFAULT_PAGE_SIZE;
use storage::{decode_heap_file, decode_heap_file_parallel, ColumnSpec, TupleDesc};

const PAGES: usize = 256;

fn columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("id", "int4", b'i', 4),
        ColumnSpec::new("name", "text", b'i', -1),
        ColumnSpec::new("owner", "oid", b'i', 4),
    ]
}

fn heap_file() -> Vec<u8> {
    let desc = TupleDesc::new(&columns()).expect("descriptor");
    let mut file = Vec::with_capacity(PAGES * DEFAULT_PAGE_SIZE);
    for p in 0..PAGES {
        let mut builder = PageBuilder::new(DEFAULT_PAGE_SIZE);
        for i in 0..120 {
            let name = format!("row {p}/{i}");
            let owner = if i % 5 == 0 { Field::Null } else { Field::Oid(10) };
            let tuple = encode_tuple(&desc, &[Field::Int4(i), Field::text(&name), owner])
                .expect("tuple");
            builder.push(tuple);
        }
        file.extend(builder.finish().expect("page"));
    }
    file
}

fn bench_decode(c: &mut Criterion) {
    let file = heap_file();
    let columns = columns();

    let mut group = c.benchmark_group("heap");
    group.throughput(Throughput::Bytes(file.len() as u64));
    group.bench_function("decode_sequential", |b| {
        b.iter(|| decode_heap_file(black_box(&file), DEFAULT_PAGE_SIZE, &columns))
    });
    group.bench_function("decode_parallel", |b| {
        b.iter(|| decode_heap_file_parallel(black_box(&file), DEFAULT_PAGE_SIZE, &columns))
    });
    group.finish();
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
