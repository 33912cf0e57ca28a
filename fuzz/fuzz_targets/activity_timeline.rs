#![no_main]
use audio_perf_lab::ActivityTimeline;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (u8, u8, u8, Vec<(i16, u16, u8, bool)>)| {
    let (width, duration_tenths, extra_tenths, samples) = input;
    let duration = duration_tenths as f64 / 10.0;
    let mut timeline = ActivityTimeline::new(width as usize, duration, extra_tenths as f64 / 10.0);

    // Perform a sequence of writes, freezes and window moves
    for (i, (time_ms, length_ms, value, freeze)) in samples.into_iter().take(512).enumerate() {
        let time = time_ms as f64 / 1000.0;
        timeline.add_sample(time, length_ms as f64 / 1000.0, value as f64 / 255.0, i % 4);
        if freeze {
            timeline.set_frozen(!timeline.is_frozen());
        }
        timeline.set_start_time(time - duration / 2.0);

        let visible = timeline.visible();
        assert!(visible.len() <= width as usize + 1);
        assert!(visible.iter().all(|p| (0.0..=1.0).contains(&p.value)));
    }
});
