use esn_link::parse::format_values;
use esn_link::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn frame_bytes(tag: FrameTag, values: &[f32], trailer: bool) -> Vec<u8> {
    encode_frame(tag.wire_id(), format_values(values).as_bytes(), trailer).unwrap()
}

/// Feed `bytes` in random chunk sizes, collecting every dispatch.
fn feed_randomly(link: &mut Link, bytes: &[u8], seed: u64) -> Vec<Dispatched> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        let n = rng.gen_range(1..=rest.len().min(64));
        out.extend(link.feed(&rest[..n]));
        rest = &rest[n..];
    }
    out
}

fn ran(d: &Dispatched) -> &RunReport {
    match &d.result {
        Ok(Applied::Ran(report)) => report,
        other => panic!("expected a run, got {other:?}"),
    }
}

#[test]
fn test_two_by_two_over_byte_stream() {
    let mut config = EsnConfig::new(2, 2, 1);
    config.trailer = true;
    let mut link = Link::new(config).unwrap();

    let mut stream = Vec::new();
    stream.extend(frame_bytes(FrameTag::WeightsIn, &[1.0, 0.0, 0.0, 1.0], true));
    stream.extend(frame_bytes(FrameTag::WeightsRes, &[0.0; 4], true));
    stream.extend(frame_bytes(FrameTag::WeightsOut, &[0.25; 4], true));
    stream.extend(frame_bytes(FrameTag::DataIn, &[1.0, 1.0], true));

    let out = feed_randomly(&mut link, &stream, 1);
    assert_eq!(out.len(), 4);
    assert!(out[..3].iter().all(|d| d.result.is_ok()));

    let report = ran(&out[3]);
    assert_eq!(report.samples, 1);
    assert!((report.outputs[0] - 0.880_797).abs() < 1e-5);
    assert!(link.assembler().is_idle());
}

#[test]
fn test_split_pattern_does_not_change_results() {
    let config = EsnConfig::new(3, 5, 2);
    let mut rng = StdRng::seed_from_u64(99);
    let mut values = |n: usize| -> Vec<f32> { (0..n).map(|_| rng.gen_range(-0.5..0.5)).collect() };

    let mut stream = Vec::new();
    stream.extend(frame_bytes(FrameTag::WeightsIn, &values(15), false));
    stream.extend(frame_bytes(FrameTag::WeightsRes, &values(25), false));
    stream.extend(frame_bytes(FrameTag::WeightsOut, &values(16), false));
    stream.extend(frame_bytes(FrameTag::DataOut, &values(2 * 12), false));
    for _ in 0..3 {
        stream.extend(frame_bytes(FrameTag::DataIn, &values(3 * 4), false));
    }

    let mut finals = Vec::new();
    for seed in 0..5 {
        let mut link = Link::new(config.clone()).unwrap();
        link.session_mut().enable_training();
        let out = feed_randomly(&mut link, &stream, seed);
        assert!(out.iter().all(|d| d.result.is_ok()));

        let s = link.session();
        let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        finals.push((bits(s.state()), bits(s.w_out().as_slice()), bits(s.psi().as_slice())));
    }
    assert!(finals.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn test_online_training_reduces_error() {
    let mut config = EsnConfig::new(2, 4, 1);
    config.max_target_samples = 400;
    config.training = true;
    let mut link = Link::new(config).unwrap();
    let mut rng = StdRng::seed_from_u64(5);

    let w_in: Vec<f32> = (0..8).map(|_| rng.gen_range(-0.5..0.5)).collect();
    let w_x: Vec<f32> = (0..16).map(|_| rng.gen_range(-0.2..0.2)).collect();
    let inputs: Vec<f32> = (0..400 * 2).map(|_| rng.gen_range(-1.0..1.0)).collect();
    // the readout sees the raw input, so this target is exactly learnable
    let targets: Vec<f32> = inputs.chunks(2).map(|x| 0.7 * x[0] - 0.3 * x[1]).collect();

    link.feed(&frame_bytes(FrameTag::WeightsIn, &w_in, false));
    link.feed(&frame_bytes(FrameTag::WeightsRes, &w_x, false));
    link.feed(&frame_bytes(FrameTag::DataOut, &targets, false));

    let mut batches = Vec::new();
    for chunk in inputs.chunks(40) {
        let out = link.feed(&frame_bytes(FrameTag::DataIn, chunk, false));
        batches.push(ran(&out[0]).batch_mse.unwrap());
    }

    let stats = link.session().stats();
    assert_eq!(stats.total_samples_processed, 400);
    assert_eq!(stats.cumulative_sample_count, 400);
    assert!(batches[9] < batches[0] * 0.1, "batches {batches:?}");
    assert!(stats.mse_db().unwrap() < 0.0);
}

#[test]
fn test_reset_command_clears_session() {
    let mut link = Link::new(EsnConfig::new(1, 1, 1)).unwrap();
    link.feed(&frame_bytes(FrameTag::WeightsIn, &[1.0], false));
    link.feed(&frame_bytes(FrameTag::WeightsRes, &[0.5], false));
    link.feed(&frame_bytes(FrameTag::WeightsOut, &[1.0, 1.0], false));
    link.feed(&frame_bytes(FrameTag::DataOut, &[1.0], false));
    link.feed(&frame_bytes(FrameTag::DataIn, &[1.0], false));
    assert_eq!(link.session().stats().total_samples_processed, 1);

    link.command(b"RESET").unwrap();

    assert_eq!(link.session().stats(), &SessionStats::default());
    let out = link.feed(&frame_bytes(FrameTag::DataIn, &[1.0], false));
    match &out[0].result {
        Err(LinkError::MissingPrerequisite(missing)) => {
            assert!(missing.contains(Ready::W_IN | Ready::W_X | Ready::W_OUT))
        }
        other => panic!("unexpected {other:?}"),
    }
    // the refused samples wait for a RUN once weights are back
    link.feed(&frame_bytes(FrameTag::WeightsIn, &[1.0], false));
    link.feed(&frame_bytes(FrameTag::WeightsRes, &[0.5], false));
    link.feed(&frame_bytes(FrameTag::WeightsOut, &[1.0, 1.0], false));
    let report = link.command(b"RUN").unwrap().unwrap();
    assert_eq!(report.samples, 1);
}

#[test]
fn test_resend_after_mismatch() {
    let mut link = Link::new(EsnConfig::new(2, 2, 1)).unwrap();
    link.feed(&frame_bytes(FrameTag::WeightsIn, &[1.0, 2.0, 3.0, 4.0], false));

    let out = link.feed(&encode_frame(b"WIN_____", b"9\n9\noops\n", false).unwrap());
    assert!(matches!(out[0].result, Err(LinkError::ParseCountMismatch { .. })));
    assert_eq!(link.session().w_in().as_slice(), &[1.0, 2.0, 3.0, 4.0]);

    let out = link.feed(&frame_bytes(FrameTag::WeightsIn, &[5.0, 6.0, 7.0, 8.0], false));
    assert_eq!(out[0].result.as_ref().unwrap(), &Applied::Installed(FrameTag::WeightsIn));
    assert_eq!(link.session().w_in().as_slice(), &[5.0, 6.0, 7.0, 8.0]);
}

#[test]
fn test_rdi_restarts_sequence() {
    let mut link = Link::new(EsnConfig::new(1, 1, 1)).unwrap();
    link.feed(&frame_bytes(FrameTag::WeightsIn, &[1.0], false));
    link.feed(&frame_bytes(FrameTag::WeightsRes, &[1.0], false));
    link.feed(&frame_bytes(FrameTag::WeightsOut, &[1.0, 0.0], false));

    let first = link.feed(&frame_bytes(FrameTag::DataIn, &[0.5, 0.5], false));
    let first = ran(&first[0]).outputs.clone();

    link.command(b"RDI").unwrap();
    assert_eq!(link.session().state(), &[0.0]);

    let again = link.feed(&frame_bytes(FrameTag::DataIn, &[0.5, 0.5], false));
    assert_eq!(ran(&again[0]).outputs, first);
}
