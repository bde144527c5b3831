use std::f64::consts::PI;

/// Gaussian line of total `area` counts, sampled at channel centres.
pub fn gaussian_line(channels: usize, center: f64, sigma: f64, area: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        return vec![0.0; channels];
    }
    let norm = area / (sigma * (2.0 * PI).sqrt());
    (0..channels)
        .map(|i| {
            let z = (i as f64 - center) / sigma;
            norm * (-0.5 * z * z).exp()
        })
        .collect()
}

/// Exponentially falling continuum whose channels sum to `total`.
pub fn exponential_continuum(channels: usize, total: f64, slope: f64) -> Vec<f64> {
    let shape: Vec<f64> = (0..channels).map(|i| (-slope * i as f64).exp()).collect();
    let sum: f64 = shape.iter().sum();
    if sum <= 0.0 {
        return vec![0.0; channels];
    }
    shape.into_iter().map(|v| v * total / sum).collect()
}
