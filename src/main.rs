use std::env;

use anyhow::Context;

use zvhn::model::{build_cnn, build_mlp};
use zvhn::preprocess::preprocess;
use zvhn::svhn;
use zvhn::training::{evaluate, fit, FitConfig};

fn main() -> anyhow::Result<()> {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init(); // Log to stderr (run with `RUST_LOG=debug` for more).

    svhn::ensure_downloaded(svhn::TRAIN_FILE, svhn::TRAIN_URL)
        .context("downloading the training split")?;
    svhn::ensure_downloaded(svhn::TEST_FILE, svhn::TEST_URL)
        .context("downloading the test split")?;

    let train = svhn::load_split(svhn::TRAIN_FILE).context("loading the training split")?;
    let test = svhn::load_split(svhn::TEST_FILE).context("loading the test split")?;

    let (x_train, y_train) = preprocess(&train);
    let (x_test, y_test) = preprocess(&test);

    let shape = x_train.shape();
    let input_shape = (shape[1], shape[2], shape[3]);

    let mut model_mlp = build_mlp(input_shape);
    let mut model_cnn = build_cnn(input_shape);

    let config = FitConfig::default();
    fit(&mut model_mlp, &x_train, &y_train, &config);
    fit(&mut model_cnn, &x_train, &y_train, &config);

    evaluate(&model_cnn, &x_test, &y_test);
    evaluate(&model_mlp, &x_test, &y_test);

    Ok(())
}
