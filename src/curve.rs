use crate::error::{Result, TagTrailError};
use crate::keyfile::CurveSection;
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};

/// Affine point on a short-Weierstrass curve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Point {
    Infinity,
    Affine { x: BigUint, y: BigUint },
}

impl Point {
    pub fn affine(x: BigUint, y: BigUint) -> Self {
        Point::Affine { x, y }
    }

    pub fn coords(&self) -> Option<(&BigUint, &BigUint)> {
        match self {
            Point::Infinity => None,
            Point::Affine { x, y } => Some((x, y)),
        }
    }
}

/// Short-Weierstrass curve y² = x³ + ax + b over F_p with group order n.
///
/// secp160r1 is not covered by the RustCrypto curve crates, so the group
/// law is written out over big integers. Coordinates are `size` bytes,
/// scalars `n_size` bytes (the order exceeds the field width by one).
#[derive(Debug, Clone)]
pub struct WeierstrassCurve {
    pub name: String,
    pub a: BigUint,
    pub b: BigUint,
    pub p: BigUint,
    pub n: BigUint,
    pub gx: BigUint,
    pub gy: BigUint,
    pub size: usize,
    pub n_size: usize,
}

impl WeierstrassCurve {
    /// Published secp160r1 parameters.
    pub fn secp160r1() -> Self {
        let hx = |s: &[u8]| BigUint::parse_bytes(s, 16).expect("curve constant");
        Self {
            name: "secp160r1".to_string(),
            a: hx(b"ffffffffffffffffffffffffffffffff7ffffffc"),
            b: hx(b"1c97befc54bd7a8b65acf89f81d4d4adc565fa45"),
            p: hx(b"ffffffffffffffffffffffffffffffff7fffffff"),
            n: hx(b"0100000000000000000001f4c8f927aed3ca752257"),
            gx: hx(b"4a96b5688ef573284664698968c38bb913cbfc82"),
            gy: hx(b"23a628553168947d59dcc912042351377ac5fb32"),
            size: 20,
            n_size: 21,
        }
    }

    pub fn from_section(section: &CurveSection) -> Self {
        Self {
            name: section.name.clone(),
            a: section.a.clone(),
            b: section.b.clone(),
            p: section.p.clone(),
            n: section.n.clone(),
            gx: section.gx.clone(),
            gy: section.gy.clone(),
            size: section.size,
            n_size: section.n_size,
        }
    }

    pub fn to_section(&self) -> CurveSection {
        CurveSection {
            name: self.name.clone(),
            a: self.a.clone(),
            b: self.b.clone(),
            p: self.p.clone(),
            n: self.n.clone(),
            gx: self.gx.clone(),
            gy: self.gy.clone(),
            size: self.size,
            n_size: self.n_size,
        }
    }

    pub fn generator(&self) -> Point {
        Point::affine(self.gx.clone(), self.gy.clone())
    }

    pub fn contains(&self, point: &Point) -> bool {
        match point {
            Point::Infinity => true,
            Point::Affine { x, y } => {
                if x >= &self.p || y >= &self.p {
                    return false;
                }
                let lhs = (y * y) % &self.p;
                let rhs = (x * x * x + &self.a * x + &self.b) % &self.p;
                lhs == rhs
            }
        }
    }

    fn mod_sub(&self, a: &BigUint, b: &BigUint) -> BigUint {
        ((a % &self.p) + &self.p - (b % &self.p)) % &self.p
    }

    /// Inverse mod p via Fermat (p is prime).
    fn mod_inv(&self, v: &BigUint) -> BigUint {
        let exp = &self.p - BigUint::from(2u8);
        v.modpow(&exp, &self.p)
    }

    pub fn neg(&self, point: &Point) -> Point {
        match point {
            Point::Infinity => Point::Infinity,
            Point::Affine { x, y } => {
                if y.is_zero() {
                    Point::affine(x.clone(), y.clone())
                } else {
                    Point::affine(x.clone(), &self.p - y)
                }
            }
        }
    }

    pub fn add(&self, lhs: &Point, rhs: &Point) -> Point {
        let (x1, y1) = match lhs.coords() {
            None => return rhs.clone(),
            Some(c) => c,
        };
        let (x2, y2) = match rhs.coords() {
            None => return lhs.clone(),
            Some(c) => c,
        };

        if x1 == x2 && (y1 + y2) % &self.p == BigUint::zero() {
            return Point::Infinity;
        }

        let lambda = if x1 == x2 && y1 == y2 {
            // tangent slope: (3x² + a) / 2y
            let num = (BigUint::from(3u8) * x1 * x1 + &self.a) % &self.p;
            let den = (BigUint::from(2u8) * y1) % &self.p;
            (num * self.mod_inv(&den)) % &self.p
        } else {
            let num = self.mod_sub(y2, y1);
            let den = self.mod_sub(x2, x1);
            (num * self.mod_inv(&den)) % &self.p
        };

        let x3 = self.mod_sub(&self.mod_sub(&((&lambda * &lambda) % &self.p), x1), x2);
        let y3 = self.mod_sub(&((&lambda * self.mod_sub(x1, &x3)) % &self.p), y1);
        Point::affine(x3, y3)
    }

    pub fn sub(&self, lhs: &Point, rhs: &Point) -> Point {
        self.add(lhs, &self.neg(rhs))
    }

    /// Scalar multiplication, double-and-add from the high bit.
    pub fn mul(&self, k: &BigUint, point: &Point) -> Point {
        let k = k % &self.n;
        if k.is_zero() {
            return Point::Infinity;
        }
        let mut acc = Point::Infinity;
        for i in (0..k.bits()).rev() {
            acc = self.add(&acc, &acc);
            if k.bit(i) {
                acc = self.add(&acc, point);
            }
        }
        acc
    }

    /// Uniform scalar in [1, n).
    pub fn random_scalar(&self) -> BigUint {
        rand::thread_rng().gen_biguint_range(&BigUint::one(), &self.n)
    }

    /// Fresh key pair (scalar, scalar·G).
    pub fn gen_keypair(&self) -> (BigUint, Point) {
        let sk = self.random_scalar();
        let pk = self.mul(&sk, &self.generator());
        (sk, pk)
    }

    /// Fixed-width big-endian x||y encoding.
    pub fn point_to_bytes(&self, point: &Point) -> Result<Vec<u8>> {
        let (x, y) = point.coords().ok_or_else(|| {
            TagTrailError::Crypto("cannot serialize the point at infinity".to_string())
        })?;
        let mut out = Vec::with_capacity(2 * self.size);
        out.extend_from_slice(&to_fixed_be(x, self.size)?);
        out.extend_from_slice(&to_fixed_be(y, self.size)?);
        Ok(out)
    }

    /// Parses a fixed-width x||y encoding, checking curve membership.
    pub fn point_from_bytes(&self, bytes: &[u8]) -> Result<Point> {
        if bytes.len() != 2 * self.size {
            return Err(TagTrailError::TagContent(format!(
                "point encoding must be {} bytes, got {}",
                2 * self.size,
                bytes.len()
            )));
        }
        let x = BigUint::from_bytes_be(&bytes[..self.size]);
        let y = BigUint::from_bytes_be(&bytes[self.size..]);
        let point = Point::affine(x, y);
        if !self.contains(&point) {
            return Err(TagTrailError::TagContent(
                "coordinates are not a point on the curve".to_string(),
            ));
        }
        Ok(point)
    }

    /// SEC1-style compression: 02/03 prefix by y parity, then x.
    pub fn compress_point(&self, point: &Point) -> Result<Vec<u8>> {
        let (x, y) = point.coords().ok_or_else(|| {
            TagTrailError::Crypto("cannot compress the point at infinity".to_string())
        })?;
        let prefix = if (y % BigUint::from(2u8)).is_zero() {
            0x02
        } else {
            0x03
        };
        let mut out = vec![prefix];
        out.extend_from_slice(&to_fixed_be(x, self.size)?);
        Ok(out)
    }

    /// ElGamal over points: (r·G, M + r·pub).
    pub fn elgamal_encrypt(&self, message: &Point, pub_key: &Point) -> (Point, Point) {
        let r = self.random_scalar();
        let c1 = self.mul(&r, &self.generator());
        let c2 = self.add(message, &self.mul(&r, pub_key));
        (c1, c2)
    }

    /// ElGamal decryption: M = C2 − sk·C1.
    pub fn elgamal_decrypt(&self, pri_key: &BigUint, c1: &Point, c2: &Point) -> Point {
        self.sub(c2, &self.mul(pri_key, c1))
    }
}

/// Big-endian encoding left-padded to exactly `size` bytes.
pub fn to_fixed_be(v: &BigUint, size: usize) -> Result<Vec<u8>> {
    let raw = v.to_bytes_be();
    if raw.len() > size {
        return Err(TagTrailError::Crypto(format!(
            "value needs {} bytes, field is {}",
            raw.len(),
            size
        )));
    }
    let mut out = vec![0u8; size - raw.len()];
    out.extend_from_slice(&raw);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_on_curve() {
        let curve = WeierstrassCurve::secp160r1();
        assert!(curve.contains(&curve.generator()));
    }

    #[test]
    fn test_order_annihilates_generator() {
        let curve = WeierstrassCurve::secp160r1();
        let n_minus_1 = &curve.n - BigUint::one();
        let q = curve.mul(&n_minus_1, &curve.generator());
        assert_eq!(curve.add(&q, &curve.generator()), Point::Infinity);
    }

    #[test]
    fn test_double_matches_add() {
        let curve = WeierstrassCurve::secp160r1();
        let g = curve.generator();
        let doubled = curve.add(&g, &g);
        let two_g = curve.mul(&BigUint::from(2u8), &g);
        assert_eq!(doubled, two_g);
        assert!(curve.contains(&two_g));
    }

    #[test]
    fn test_scalar_mul_distributes() {
        let curve = WeierstrassCurve::secp160r1();
        let g = curve.generator();
        let a = BigUint::from(1234567u32);
        let b = BigUint::from(7654321u32);
        let lhs = curve.mul(&(&a + &b), &g);
        let rhs = curve.add(&curve.mul(&a, &g), &curve.mul(&b, &g));
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn test_point_bytes_round_trip() {
        let curve = WeierstrassCurve::secp160r1();
        let (_, point) = curve.gen_keypair();
        let bytes = curve.point_to_bytes(&point).unwrap();
        assert_eq!(bytes.len(), 40);
        assert_eq!(curve.point_from_bytes(&bytes).unwrap(), point);
    }

    #[test]
    fn test_off_curve_bytes_rejected() {
        let curve = WeierstrassCurve::secp160r1();
        let (_, point) = curve.gen_keypair();
        let mut bytes = curve.point_to_bytes(&point).unwrap();
        bytes[3] ^= 0x40;
        assert!(curve.point_from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_elgamal_round_trip() {
        let curve = WeierstrassCurve::secp160r1();
        let (sk, pk) = curve.gen_keypair();
        let (_, message) = curve.gen_keypair();

        let (c1, c2) = curve.elgamal_encrypt(&message, &pk);
        assert_eq!(curve.elgamal_decrypt(&sk, &c1, &c2), message);
    }

    #[test]
    fn test_rerandomization_preserves_plaintext() {
        let curve = WeierstrassCurve::secp160r1();
        let (sk, pk) = curve.gen_keypair();
        let (_, message) = curve.gen_keypair();
        let (c1, c2) = curve.elgamal_encrypt(&message, &pk);

        // add an encryption of the identity
        let r = curve.random_scalar();
        let c1b = curve.add(&curve.mul(&r, &curve.generator()), &c1);
        let c2b = curve.add(&curve.mul(&r, &pk), &c2);

        assert_ne!((c1.clone(), c2.clone()), (c1b.clone(), c2b.clone()));
        assert_eq!(curve.elgamal_decrypt(&sk, &c1b, &c2b), message);
    }

    #[test]
    fn test_compress_prefix_parity() {
        let curve = WeierstrassCurve::secp160r1();
        let (_, point) = curve.gen_keypair();
        let compressed = curve.compress_point(&point).unwrap();
        assert_eq!(compressed.len(), 21);
        let (_, y) = point.coords().unwrap();
        let expected = if (y % BigUint::from(2u8)).is_zero() { 0x02 } else { 0x03 };
        assert_eq!(compressed[0], expected);
    }

    #[test]
    fn test_fixed_be_padding() {
        let v = BigUint::from(0xabcdu32);
        assert_eq!(to_fixed_be(&v, 4).unwrap(), vec![0, 0, 0xab, 0xcd]);
        assert!(to_fixed_be(&BigUint::from(0x1_0000_0000u64), 4).is_err());
    }
}
