//! Stacked LSTM regressor: LSTM (sequence) -> dropout -> LSTM (last state)
//! -> dropout -> linear head. Parameters live in a `VarMap` so the trainer
//! can hand them straight to the optimizer.

use candle_core::{bail, DType, Device, Result, Tensor, Var};
use candle_nn::rnn::{lstm, LSTMConfig, LSTM, RNN};
use candle_nn::{linear, Dropout, Linear, Module, VarBuilder, VarMap};
use rand::Rng;

pub(crate) struct Network {
    varmap: VarMap,
    device: Device,
    encoder: LSTM,
    decoder: LSTM,
    dropout: Dropout,
    head: Linear,
    outputs: usize,
}

impl Network {
    pub(crate) fn new<R: Rng + ?Sized>(
        features: usize,
        hidden: [usize; 2],
        outputs: usize,
        dropout: f64,
        rng: &mut R,
    ) -> Result<Self> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = lstm(features, hidden[0], LSTMConfig::default(), vb.pp("encoder"))?;
        let decoder = lstm(hidden[0], hidden[1], LSTMConfig::default(), vb.pp("decoder"))?;
        let head = linear(hidden[1], outputs, vb.pp("head"))?;
        seed_parameters(&varmap, rng)?;

        Ok(Self {
            varmap,
            device,
            encoder,
            decoder,
            dropout: Dropout::new(dropout as f32),
            head,
            outputs,
        })
    }

    pub(crate) fn output_len(&self) -> usize {
        self.outputs
    }

    pub(crate) fn device(&self) -> &Device {
        &self.device
    }

    pub(crate) fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// `xs` is `(batch, steps, features)`; returns `(batch, outputs)`.
    /// Dropout is only active when `train` is set.
    pub(crate) fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let states = self.encoder.seq(xs)?;
        let sequence = self.encoder.states_to_tensor(&states)?;
        let sequence = self.dropout.forward(&sequence, train)?;

        let states = self.decoder.seq(&sequence)?;
        let Some(last) = states.last() else {
            bail!("empty input sequence")
        };
        let last = self.dropout.forward(last.h(), train)?;
        self.head.forward(&last)
    }
}

/// Seeded Glorot-uniform kernels and zero biases, except the LSTM forget
/// gate bias which starts at one. Gate order is input, forget, cell, output.
fn seed_parameters<R: Rng + ?Sized>(varmap: &VarMap, rng: &mut R) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| candle_core::Error::Msg("parameter map lock poisoned".to_string()))?;
    let mut names: Vec<&String> = data.keys().collect();
    names.sort();

    for name in names {
        let var = &data[name];
        let dims = var.dims().to_vec();
        let values: Vec<f32> = match *dims.as_slice() {
            [rows, cols] => {
                let limit = (6.0 / (rows + cols) as f64).sqrt();
                (0..rows * cols).map(|_| rng.gen_range(-limit..limit) as f32).collect()
            }
            [len] if name.contains("bias_ih") => {
                let hidden = len / 4;
                (0..len).map(|k| if (hidden..2 * hidden).contains(&k) { 1.0 } else { 0.0 }).collect()
            }
            _ => vec![0.0; dims.iter().product()],
        };
        var.set(&Tensor::from_vec(values, dims.as_slice(), var.device())?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::loss::mse;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn network(seed: u64, dropout: f64) -> Network {
        Network::new(3, [6, 4], 8, dropout, &mut StdRng::seed_from_u64(seed)).unwrap()
    }

    fn sequence(net: &Network, batch: usize, steps: usize) -> Tensor {
        let values: Vec<f32> = (0..batch * steps * 3).map(|k| ((k as f32) * 0.37).sin()).collect();
        Tensor::from_vec(values, (batch, steps, 3), net.device()).unwrap()
    }

    #[test]
    fn output_has_expected_shape() {
        let net = network(1, 0.0);
        let out = net.forward(&sequence(&net, 2, 5), false).unwrap();
        assert_eq!(out.dims(), &[2, 8]);
        assert_eq!(net.output_len(), 8);
    }

    #[test]
    fn forget_bias_starts_at_one() {
        let net = network(1, 0.0);
        let data = net.varmap.data().lock().unwrap();
        let (_, bias) = data
            .iter()
            .find(|(name, _)| name.starts_with("encoder") && name.contains("bias_ih"))
            .unwrap();
        let values = bias.as_tensor().to_vec1::<f32>().unwrap();
        assert_eq!(values.len(), 24);
        assert!(values[..6].iter().all(|&v| v == 0.0));
        assert!(values[6..12].iter().all(|&v| v == 1.0));
        assert!(values[12..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn same_seed_gives_same_weights() {
        let a = network(7, 0.0);
        let b = network(7, 0.0);
        let c = network(8, 0.0);
        let xs = sequence(&a, 1, 4);
        let out = |n: &Network| n.forward(&xs, false).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(out(&a), out(&b));
        assert_ne!(out(&a), out(&c));
    }

    #[test]
    fn inference_ignores_dropout() {
        let net = network(3, 0.5);
        let xs = sequence(&net, 2, 6);
        let first = net.forward(&xs, false).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let second = net.forward(&xs, false).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn loss_reaches_every_parameter() {
        let net = network(5, 0.0);
        let xs = sequence(&net, 3, 5);
        let target = Tensor::zeros((3, 8), DType::F32, net.device()).unwrap();
        let loss = mse(&net.forward(&xs, true).unwrap(), &target).unwrap();
        let grads = loss.backward().unwrap();
        let vars = net.vars();
        assert_eq!(vars.len(), 10);
        for var in &vars {
            assert!(grads.get(var.as_tensor()).is_some());
        }
    }
}
