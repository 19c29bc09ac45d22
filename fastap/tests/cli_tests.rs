use approx::assert_abs_diff_eq;
use candle_core::{DType, Device, Tensor};
use clap::Parser;
use fastap::cli::{loss, Cli, Commands, LossArgs};
use fastap::{FastAPConfig, FastAPLoss, IndicesTuple, MetricLossT};
use metric_util::common_io::write_lines;
use metric_util::traits::IoOps;

fn write_inputs(dir: &std::path::Path) -> anyhow::Result<(String, String, String)> {
    let emb_file = dir.join("emb.tsv.gz").to_string_lossy().to_string();
    let lab_file = dir.join("labels.txt").to_string_lossy().to_string();
    let trip_file = dir.join("triplets.txt").to_string_lossy().to_string();

    let x = Tensor::new(
        &[[1_f32, 0.], [0.9, 0.1], [-1., 0.], [-0.9, -0.1], [0., 1.]],
        &Device::Cpu,
    )?;
    x.to_tsv(&emb_file)?;

    let labels: Vec<Box<str>> = ["x", "x", "y", "y", "x"].iter().map(|&s| s.into()).collect();
    write_lines(&labels, &lab_file)?;

    let triplets: Vec<Box<str>> = ["0 1 2", "3 2 4"].iter().map(|&s| s.into()).collect();
    write_lines(&triplets, &trip_file)?;

    Ok((emb_file, lab_file, trip_file))
}

#[test]
fn loss_command_writes_gradient() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (emb_file, lab_file, trip_file) = write_inputs(dir.path())?;
    let grad_file = dir.path().join("out").join("grad.tsv").to_string_lossy().to_string();

    let cli = Cli::try_parse_from([
        "fastap",
        "loss",
        emb_file.as_str(),
        "--labels",
        lab_file.as_str(),
        "--triplets",
        trip_file.as_str(),
        "--grad-out",
        grad_file.as_str(),
        "--num-bins",
        "20",
        "--f64",
    ])?;

    match &cli.command {
        Commands::Loss(args) => loss::run(args)?,
    }

    let grad = Tensor::from_tsv(&grad_file, None)?;
    assert_eq!(grad.dims(), &[5, 2]);
    Ok(())
}

#[test]
fn loss_command_rejects_label_mismatch() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (emb_file, _, _) = write_inputs(dir.path())?;

    let short_labels = dir.path().join("short.txt").to_string_lossy().to_string();
    let labels: Vec<Box<str>> = ["x", "y"].iter().map(|&s| s.into()).collect();
    write_lines(&labels, &short_labels)?;

    let cli = Cli::try_parse_from([
        "fastap",
        "loss",
        emb_file.as_str(),
        "--labels",
        short_labels.as_str(),
    ])?;

    match &cli.command {
        Commands::Loss(args) => assert!(loss::run(args).is_err()),
    }
    Ok(())
}

fn loss_args(argv: &[&str]) -> anyhow::Result<LossArgs> {
    let cli = Cli::try_parse_from(["fastap", "loss"].iter().chain(argv).copied())?;
    match cli.command {
        Commands::Loss(args) => Ok(args),
    }
}

#[test]
fn loss_command_matches_library_forward() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (emb_file, lab_file, trip_file) = write_inputs(dir.path())?;

    let plain = loss::evaluate(&loss_args(&[
        emb_file.as_str(),
        "--labels",
        lab_file.as_str(),
        "--f64",
    ])?)?;
    let weighted = loss::evaluate(&loss_args(&[
        emb_file.as_str(),
        "--labels",
        lab_file.as_str(),
        "--triplets",
        trip_file.as_str(),
        "--f64",
    ])?)?;

    let x = Tensor::from_tsv(&emb_file, None)?.to_dtype(DType::F64)?;
    let labels = ["x", "x", "y", "y", "x"];
    let triplets = IndicesTuple::Triplets {
        a: vec![0, 3],
        p: vec![1, 2],
        n: vec![2, 4],
    };
    let loss_fn = FastAPLoss::new(FastAPConfig::default())?;

    let expected_plain = loss_fn.forward(&x, &labels, None)?.to_scalar::<f64>()?;
    let expected_weighted = loss_fn
        .forward(&x, &labels, Some(&triplets))?
        .to_scalar::<f64>()?;

    assert_abs_diff_eq!(plain, expected_plain, epsilon = 1e-12);
    assert_abs_diff_eq!(weighted, expected_weighted, epsilon = 1e-12);

    // anchors 0, 1, 3 and 4 weigh one half, anchor 2 weighs one
    assert!(weighted > plain + 1e-3, "{} vs {}", weighted, plain);
    Ok(())
}

#[test]
fn loss_command_rejects_blank_labels() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (emb_file, _, _) = write_inputs(dir.path())?;

    let gap_labels = dir.path().join("gap.txt").to_string_lossy().to_string();
    let labels: Vec<Box<str>> = ["x", "x", "", "y", "y", "x"]
        .iter()
        .map(|&s| s.into())
        .collect();
    write_lines(&labels, &gap_labels)?;

    let args = loss_args(&[emb_file.as_str(), "--labels", gap_labels.as_str()])?;
    let err = loss::evaluate(&args).expect_err("blank label line");
    assert!(err.to_string().contains("line 3"), "{}", err);
    Ok(())
}

#[test]
fn trailing_blank_label_lines_are_ignored() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (emb_file, _, _) = write_inputs(dir.path())?;

    let padded_labels = dir.path().join("padded.txt").to_string_lossy().to_string();
    let labels: Vec<Box<str>> = ["x", "x", "y", "y", "x", "", ""]
        .iter()
        .map(|&s| s.into())
        .collect();
    write_lines(&labels, &padded_labels)?;

    let args = loss_args(&[emb_file.as_str(), "--labels", padded_labels.as_str()])?;
    assert!(loss::evaluate(&args)?.is_finite());
    Ok(())
}
