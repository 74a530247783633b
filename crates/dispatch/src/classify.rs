//! Precision classification
//!
//! A single-pass heuristic, not type inference: quantization dominates,
//! otherwise the weights of the first convolution-family operator with a
//! recognized type decide.

use tracing::debug;

use cortex_core::{ElementType, ModelGraph, Precision};

/// Operator type marking a quantized model
pub const QUANTIZATION_MARKER: &str = "FakeQuantize";

/// Convolution-family operator types, plain, grouped and transposed
pub const CONVOLUTION_FAMILY: [&str; 6] = [
    "Convolution",
    "GroupConvolution",
    "GroupConvolutionBackpropData",
    "ConvolutionBackpropData",
    "ConvolutionIE",
    "DeconvolutionIE",
];

const WEIGHTS_INPUT: usize = 1;

pub fn is_convolution(type_name: &str) -> bool {
    CONVOLUTION_FAMILY.contains(&type_name)
}

pub fn classify(graph: &dyn ModelGraph) -> Precision {
    if graph.has_op_with_type(QUANTIZATION_MARKER) {
        debug!(graph = %graph.name(), "Quantization marker found");
        return Precision::Int8;
    }

    for op in graph.ordered_ops().iter().filter(|op| is_convolution(&op.type_name)) {
        match op.input_element_type(WEIGHTS_INPUT) {
            Some(ElementType::F32) => return Precision::Fp32,
            Some(ElementType::F16) => return Precision::Fp16,
            other => {
                debug!(op = %op.name, weights = ?other, "Convolution weights not decisive");
            }
        }
    }

    Precision::Fp32
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::{Graph, Operation};

    fn conv(name: &str, type_name: &str, weights: ElementType) -> Operation {
        Operation::new(name, type_name)
            .with_input(ElementType::F32)
            .with_input(weights)
    }

    #[test]
    fn test_quantization_dominates() {
        let graph = Graph::new("q")
            .with_op(conv("conv", "Convolution", ElementType::F32))
            .with_op(Operation::new("fq", QUANTIZATION_MARKER));
        assert_eq!(classify(&graph), Precision::Int8);
    }

    #[test]
    fn test_f16_weights() {
        let graph = Graph::new("half").with_op(conv("conv", "Convolution", ElementType::F16));
        assert_eq!(classify(&graph), Precision::Fp16);
    }

    #[test]
    fn test_no_convolution_defaults_to_fp32() {
        let graph = Graph::new("mlp")
            .with_op(Operation::new("mm", "MatMul").with_input(ElementType::F16));
        assert_eq!(classify(&graph), Precision::Fp32);
        assert_eq!(classify(&Graph::new("empty")), Precision::Fp32);
    }

    #[test]
    fn test_first_decisive_match_wins() {
        let graph = Graph::new("mixed")
            .with_op(conv("deconv", "ConvolutionBackpropData", ElementType::F16))
            .with_op(conv("conv", "Convolution", ElementType::F32));
        assert_eq!(classify(&graph), Precision::Fp16);
    }

    #[test]
    fn test_unrecognized_weight_type_keeps_scanning() {
        let graph = Graph::new("int-weights")
            .with_op(conv("gconv", "GroupConvolution", ElementType::I8))
            .with_op(Operation::new("conv_no_weights", "Convolution").with_input(ElementType::F32))
            .with_op(conv("conv", "DeconvolutionIE", ElementType::F16));
        assert_eq!(classify(&graph), Precision::Fp16);
    }
}
