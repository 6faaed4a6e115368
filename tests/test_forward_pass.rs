// Tests for forward propagation: output shapes and known values for every
// layer, plus a full conv -> relu -> pool -> flatten -> dense -> loss stack.

use approx::assert_relative_eq;
use convnet_layers::layers::{
    ConvolutionalLayer, Flattener, FullyConnectedLayer, Layer, MaxPoolingLayer, ReluLayer,
};
use convnet_layers::loss::{softmax, softmax_with_cross_entropy, TargetIndex};
use convnet_layers::utils::SimpleRng;
use ndarray::{arr2, Array, ArrayD};

fn image(h: usize, w: usize, values: Vec<f64>) -> ArrayD<f64> {
    Array::from_shape_vec((1, h, w, 1), values).unwrap().into_dyn()
}

// ============================================================================
// Convolutional layer
// ============================================================================

mod convolution_forward_tests {
    use super::*;

    #[test]
    fn test_1x1_filter_is_per_pixel_dense() {
        let mut rng = SimpleRng::new(1);
        let (batch, h, w, c_in, c_out) = (2, 3, 4, 3, 5);
        let x = rng.randn(&[batch, h, w, c_in]);
        let mut layer = ConvolutionalLayer::new(c_in, c_out, 1, 0, &mut rng).unwrap();
        let bias = rng.randn(&[c_out]);
        layer
            .params_mut()
            .get_mut("B")
            .unwrap()
            .assign_value(bias.view())
            .unwrap();

        let y = layer.forward(&x).unwrap();
        assert_eq!(y.shape(), &[batch, h, w, c_out]);

        let weights = layer.params()["W"].value().clone();
        for b in 0..batch {
            for yy in 0..h {
                for xx in 0..w {
                    for o in 0..c_out {
                        let mut expected = bias[[o]];
                        for c in 0..c_in {
                            expected += x[[b, yy, xx, c]] * weights[[0, 0, c, o]];
                        }
                        assert_relative_eq!(y[[b, yy, xx, o]], expected, epsilon = 1e-12);
                    }
                }
            }
        }
    }

    #[test]
    fn test_2x2_filter_known_values() {
        let mut rng = SimpleRng::new(2);
        let mut layer = ConvolutionalLayer::new(1, 1, 2, 0, &mut rng).unwrap();
        // W[kx, ky]: [[1, 2], [3, 4]] multiplies X[y + ky, x + kx]
        let w = Array::from_shape_vec((2, 2, 1, 1), vec![1.0, 2.0, 3.0, 4.0])
            .unwrap()
            .into_dyn();
        layer
            .params_mut()
            .get_mut("W")
            .unwrap()
            .assign_value(w.view())
            .unwrap();

        let x = image(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.shape(), &[1, 1, 2, 1]);
        // x=0: 1*X[0,0] + 2*X[1,0] + 3*X[0,1] + 4*X[1,1] = 1 + 8 + 6 + 20
        assert_relative_eq!(y[[0, 0, 0, 0]], 35.0);
        // x=1: 1*2 + 2*5 + 3*3 + 4*6
        assert_relative_eq!(y[[0, 0, 1, 0]], 45.0);
    }

    #[test]
    fn test_padding_zero_border() {
        let mut rng = SimpleRng::new(3);
        let mut layer = ConvolutionalLayer::new(1, 1, 3, 1, &mut rng).unwrap();
        let ones = ArrayD::from_elem(vec![3, 3, 1, 1], 1.0);
        layer
            .params_mut()
            .get_mut("W")
            .unwrap()
            .assign_value(ones.view())
            .unwrap();

        let x = ArrayD::from_elem(vec![1, 3, 3, 1], 1.0);
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.shape(), &[1, 3, 3, 1]);
        // corner windows see 4 real pixels, edges 6, the centre 9
        assert_relative_eq!(y[[0, 0, 0, 0]], 4.0);
        assert_relative_eq!(y[[0, 0, 1, 0]], 6.0);
        assert_relative_eq!(y[[0, 1, 1, 0]], 9.0);
    }
}

// ============================================================================
// Pooling, activation and flattening
// ============================================================================

mod layout_forward_tests {
    use super::*;

    #[test]
    fn test_max_pool_2x2_image() {
        let mut pool = MaxPoolingLayer::new(2, 2).unwrap();
        let y = pool.forward(&image(2, 2, vec![1.0, 2.0, 3.0, 4.0])).unwrap();
        assert_eq!(y, image(1, 1, vec![4.0]));
    }

    #[test]
    fn test_max_pool_output_size_rounds_up() {
        let pool = MaxPoolingLayer::new(2, 3).unwrap();
        assert_eq!(pool.output_shape(&[4, 7, 8, 3]).unwrap(), vec![4, 3, 3, 3]);
    }

    #[test]
    fn test_max_pool_per_channel() {
        let mut pool = MaxPoolingLayer::new(2, 2).unwrap();
        let x = Array::from_shape_vec((1, 2, 2, 2), vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0, 0.0, -4.0])
            .unwrap()
            .into_dyn();
        let y = pool.forward(&x).unwrap();
        assert_eq!(y.into_raw_vec(), vec![3.0, -1.0]);
    }

    #[test]
    fn test_relu_forward() {
        let mut relu = ReluLayer::new();
        let y = relu.forward(&arr2(&[[-1.0, 0.5], [0.0, 2.0]]).into_dyn()).unwrap();
        assert_eq!(y, arr2(&[[0.0, 0.5], [0.0, 2.0]]).into_dyn());
    }

    #[test]
    fn test_flattener_shape() {
        let mut flat = Flattener::new();
        let y = flat.forward(&ArrayD::zeros(vec![5, 4, 3, 2])).unwrap();
        assert_eq!(y.shape(), &[5, 24]);
    }

    #[test]
    fn test_dense_forward_broadcasts_bias() {
        let mut rng = SimpleRng::new(4);
        let mut layer = FullyConnectedLayer::new(3, 2, &mut rng).unwrap();
        let x = ArrayD::zeros(vec![4, 3]);
        let y = layer.forward(&x).unwrap();
        let bias = layer.biases().value();
        for row in 0..4 {
            assert_relative_eq!(y[[row, 0]], bias[[0, 0]]);
            assert_relative_eq!(y[[row, 1]], bias[[0, 1]]);
        }
    }
}

// ============================================================================
// Full stack
// ============================================================================

mod stack_tests {
    use super::*;

    #[test]
    fn test_small_cnn_forward_and_loss() {
        let mut rng = SimpleRng::new(5);
        let mut layers: Vec<Box<dyn Layer>> = vec![
            Box::new(ConvolutionalLayer::new(1, 3, 3, 1, &mut rng).unwrap()),
            Box::new(ReluLayer::new()),
            Box::new(MaxPoolingLayer::new(2, 2).unwrap()),
            Box::new(Flattener::new()),
            Box::new(FullyConnectedLayer::new(27, 4, &mut rng).unwrap()),
        ];

        let mut activation = rng.randn(&[2, 6, 6, 1]);
        for layer in layers.iter_mut() {
            activation = layer.forward(&activation).unwrap();
        }
        assert_eq!(activation.shape(), &[2, 4]);

        let target = TargetIndex::Batch(vec![0, 3]);
        let (loss, grad) = softmax_with_cross_entropy(&activation, &target).unwrap();
        assert!(loss.is_finite() && loss > 0.0);
        assert_eq!(grad.shape(), activation.shape());

        let probs = softmax(&activation).unwrap();
        assert_relative_eq!(grad[[1, 3]], probs[[1, 3]] - 1.0, epsilon = 1e-12);

        let mut d = grad;
        for layer in layers.iter_mut().rev() {
            d = layer.backward(&d).unwrap();
        }
        assert_eq!(d.shape(), &[2, 6, 6, 1]);
    }

    #[test]
    fn test_output_shape_chains_through_stack() {
        let mut rng = SimpleRng::new(6);
        let mut layers: Vec<Box<dyn Layer>> = vec![
            Box::new(ConvolutionalLayer::new(1, 4, 3, 1, &mut rng).unwrap()),
            Box::new(ReluLayer::new()),
            Box::new(MaxPoolingLayer::new(2, 2).unwrap()),
            Box::new(Flattener::new()),
            Box::new(FullyConnectedLayer::new(64, 10, &mut rng).unwrap()),
        ];

        let mut shape = vec![2, 8, 8, 1];
        for layer in &layers {
            shape = layer.output_shape(&shape).unwrap();
        }
        assert_eq!(shape, vec![2, 10]);

        let mut activation = rng.randn(&[2, 8, 8, 1]);
        for layer in layers.iter_mut() {
            activation = layer.forward(&activation).unwrap();
        }
        assert_eq!(activation.shape(), shape.as_slice());
    }

    #[test]
    fn test_output_shape_rejects_mismatched_stack() {
        let mut rng = SimpleRng::new(7);
        let layers: Vec<Box<dyn Layer>> = vec![
            Box::new(ConvolutionalLayer::new(1, 4, 3, 0, &mut rng).unwrap()),
            Box::new(Flattener::new()),
            Box::new(FullyConnectedLayer::new(256, 10, &mut rng).unwrap()),
        ];

        let mut shape = vec![2, 8, 8, 1];
        let mut failed_at = None;
        for (index, layer) in layers.iter().enumerate() {
            match layer.output_shape(&shape) {
                Ok(next) => shape = next,
                Err(_) => {
                    failed_at = Some(index);
                    break;
                }
            }
        }
        // 6x6x4 = 144 features cannot feed 256 inputs
        assert_eq!(failed_at, Some(2));
        assert_eq!(shape, vec![2, 144]);
    }
}
