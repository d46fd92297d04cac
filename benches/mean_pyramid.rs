// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use criterion::{criterion_group, criterion_main, Criterion};
use direct_vo::core::camera::Intrinsics;
use direct_vo::core::frame::Frame;
use direct_vo::core::multires;
use direct_vo::misc::type_aliases::Image;

fn criterion_benchmark(c: &mut Criterion) {
    let img = Image::from_fn(640, 480, |x, y| ((x * 7 + y * 13) % 256) as f64);
    c.bench_function("mean_pyramid 5 640x480", |b| {
        b.iter(|| multires::mean_pyramid(5, img.clone()))
    });
    let intrinsics = Intrinsics {
        principal_point: (319.5, 239.5),
        focal: (500.0, 500.0),
    };
    c.bench_function("frame pyramids 5 640x480", |b| {
        b.iter(|| Frame::new(0, img.clone(), &intrinsics, 5))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
